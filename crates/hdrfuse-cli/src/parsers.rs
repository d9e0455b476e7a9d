//! Parsing functions for command-line flag values.

use hdrfuse_core::models::{ColorMode, FilterKind, OutputFormat, ResampleTarget};

/// Parse a rectangle in format "x,y,width,height"
pub fn parse_rect(rect_str: &str) -> Result<(usize, usize, usize, usize), String> {
    let parts: Vec<&str> = rect_str.split(',').collect();
    if parts.len() != 4 {
        return Err(format!(
            "Rectangle must be in format x,y,width,height, got: {}",
            rect_str
        ));
    }

    let mut values = [0usize; 4];
    for (value, (part, name)) in values.iter_mut().zip(
        parts
            .iter()
            .zip(["x offset", "y offset", "width", "height"]),
    ) {
        *value = part
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("Invalid {}: {}", name, part))?;
    }
    if values[2] == 0 || values[3] == 0 {
        return Err(format!("Rectangle must not be empty, got: {}", rect_str));
    }
    Ok((values[0], values[1], values[2], values[3]))
}

/// Parse per-channel values in format "R,G,B"
pub fn parse_rgb(rgb_str: &str) -> Result<[f32; 3], String> {
    let parts: Vec<&str> = rgb_str.split(',').collect();
    if parts.len() != 3 {
        return Err(format!(
            "Expected three comma-separated values (R,G,B), got: {}",
            rgb_str
        ));
    }

    let mut values = [0.0f32; 3];
    for (value, (part, name)) in values
        .iter_mut()
        .zip(parts.iter().zip(["red", "green", "blue"]))
    {
        *value = part
            .trim()
            .parse::<f32>()
            .map_err(|_| format!("Invalid {} value: {}", name, part))?;
    }
    Ok(values)
}

/// Parse a comma-separated list of exposure times in seconds.
///
/// Shutter-style fractions are accepted: "1/30,1/8,2" works.
pub fn parse_exptimes(times_str: &str) -> Result<Vec<f32>, String> {
    let mut times = Vec::new();
    for part in times_str.split(',') {
        let part = part.trim();
        let value = if let Some((numerator, denominator)) = part.split_once('/') {
            let n = numerator
                .trim()
                .parse::<f32>()
                .map_err(|_| format!("Invalid exposure time: {}", part))?;
            let d = denominator
                .trim()
                .parse::<f32>()
                .map_err(|_| format!("Invalid exposure time: {}", part))?;
            if d == 0.0 {
                return Err(format!("Invalid exposure time: {}", part));
            }
            n / d
        } else {
            part.parse::<f32>()
                .map_err(|_| format!("Invalid exposure time: {}", part))?
        };
        if value <= 0.0 {
            return Err(format!(
                "Exposure times must be strictly positive, got: {}",
                part
            ));
        }
        times.push(value);
    }
    Ok(times)
}

/// Parse a resampling target: "WxH" or a single longest-edge size.
pub fn parse_resample_target(target_str: &str) -> Result<ResampleTarget, String> {
    let target_str = target_str.trim();
    if let Some((width, height)) = target_str.split_once(['x', 'X']) {
        let w = width
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("Invalid width: {}", width))?;
        let h = height
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("Invalid height: {}", height))?;
        Ok(ResampleTarget::Size(w, h))
    } else {
        let edge = target_str
            .parse::<usize>()
            .map_err(|_| format!("Invalid resample target: {}", target_str))?;
        Ok(ResampleTarget::MaxEdge(edge))
    }
}

/// Parse the output color mode.
pub fn parse_colormode(mode_str: &str) -> Result<ColorMode, String> {
    match mode_str.to_lowercase().as_str() {
        "native" => Ok(ColorMode::Native),
        "srgb" => Ok(ColorMode::Srgb),
        "xyz" => Ok(ColorMode::Xyz),
        other => Err(format!(
            "Color mode must be native, srgb or xyz, got: {}",
            other
        )),
    }
}

/// Parse the output format.
pub fn parse_format(format_str: &str) -> Result<OutputFormat, String> {
    match format_str.to_lowercase().as_str() {
        "exr" => Ok(OutputFormat::Exr),
        "exr32" => Ok(OutputFormat::Exr32),
        "png" => Ok(OutputFormat::Png),
        "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
        "tiff16" | "tiff" => Ok(OutputFormat::Tiff16),
        other => Err(format!(
            "Output format must be exr, exr32, png, jpg or tiff16, got: {}",
            other
        )),
    }
}

/// Parse the reconstruction filter name.
pub fn parse_filter(filter_str: &str) -> Result<FilterKind, String> {
    match filter_str.to_lowercase().as_str() {
        "lanczos" => Ok(FilterKind::Lanczos),
        "tent" => Ok(FilterKind::Tent),
        other => Err(format!(
            "Reconstruction filter must be lanczos or tent, got: {}",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rect() {
        assert_eq!(parse_rect("10,20,640,480").unwrap(), (10, 20, 640, 480));
        assert_eq!(parse_rect(" 0 , 0 , 1 , 1 ").unwrap(), (0, 0, 1, 1));
        assert!(parse_rect("10,20,640").is_err());
        assert!(parse_rect("10,20,0,480").is_err());
        assert!(parse_rect("a,b,c,d").is_err());
    }

    #[test]
    fn test_parse_rgb() {
        assert_eq!(parse_rgb("1.8,1.0,1.4").unwrap(), [1.8, 1.0, 1.4]);
        assert!(parse_rgb("1.0,2.0").is_err());
        assert!(parse_rgb("1.0,x,2.0").is_err());
    }

    #[test]
    fn test_parse_exptimes() {
        assert_eq!(parse_exptimes("0.25,1,4").unwrap(), vec![0.25, 1.0, 4.0]);
        assert_eq!(
            parse_exptimes("1/30, 1/8, 2").unwrap(),
            vec![1.0 / 30.0, 0.125, 2.0]
        );
        assert!(parse_exptimes("1,0,4").is_err());
        assert!(parse_exptimes("1/0").is_err());
        assert!(parse_exptimes("abc").is_err());
    }

    #[test]
    fn test_parse_resample_target() {
        assert_eq!(
            parse_resample_target("1920x1080").unwrap(),
            ResampleTarget::Size(1920, 1080)
        );
        assert_eq!(
            parse_resample_target("2048").unwrap(),
            ResampleTarget::MaxEdge(2048)
        );
        assert!(parse_resample_target("axb").is_err());
        assert!(parse_resample_target("").is_err());
    }

    #[test]
    fn test_parse_colormode() {
        assert_eq!(parse_colormode("native").unwrap(), ColorMode::Native);
        assert_eq!(parse_colormode("sRGB").unwrap(), ColorMode::Srgb);
        assert_eq!(parse_colormode("XYZ").unwrap(), ColorMode::Xyz);
        assert!(parse_colormode("adobergb").is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("exr").unwrap(), OutputFormat::Exr);
        assert_eq!(parse_format("EXR32").unwrap(), OutputFormat::Exr32);
        assert_eq!(parse_format("jpeg").unwrap(), OutputFormat::Jpg);
        assert_eq!(parse_format("tiff").unwrap(), OutputFormat::Tiff16);
        assert!(parse_format("webp").is_err());
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter("lanczos").unwrap(), FilterKind::Lanczos);
        assert_eq!(parse_filter("Tent").unwrap(), FilterKind::Tent);
        assert!(parse_filter("mitchell").is_err());
    }
}
