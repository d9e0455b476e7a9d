use clap::{Parser, Subcommand};
use hdrfuse_cli::{
    determine_output_path, parse_colormode, parse_exptimes, parse_filter, parse_format,
    parse_rect, parse_resample_target, parse_rgb,
};
use hdrfuse_core::models::{ColorMode, OutputFormat, RotateFlip, VignettingMode, WhiteBalance};
use hdrfuse_core::pipeline::XYZ_FROM_SRGB;
use hdrfuse_core::ProcessOptions;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "hdrfuse")]
#[command(version, about = "Merge bracketed RAW exposures into a single HDR image", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge an exposure series into an HDR image
    Merge {
        /// Input RAW files, or a printf-style pattern (img_%03i.cr2)
        #[arg(value_name = "INPUTS", required = true)]
        inputs: Vec<PathBuf>,

        /// Output file or directory
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Output format (exr, exr32, png, jpg, tiff16)
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,

        /// Output color space (native, srgb, xyz)
        #[arg(long, value_name = "MODE")]
        colormode: Option<String>,

        /// Saturation threshold in (0, 1]; estimated from the brightest
        /// exposure when omitted
        #[arg(long, value_name = "FLOAT")]
        saturation: Option<f32>,

        /// Override the EXIF exposure times (comma-separated seconds,
        /// fractions like 1/30 allowed, in input order)
        #[arg(long, value_name = "T,T,...")]
        exptimes: Option<String>,

        /// Re-estimate the exposure times from the images themselves
        #[arg(long)]
        fit_exptimes: bool,

        /// Seed for the exposure fitter's random patch placement
        #[arg(long, value_name = "N", default_value = "0")]
        seed: u64,

        /// Keep the single-channel mosaic instead of demosaicing
        #[arg(long)]
        no_demosaic: bool,

        /// White balance multipliers (R,G,B)
        #[arg(long, value_name = "R,G,B", conflicts_with = "wb_patch")]
        wb: Option<String>,

        /// Estimate white balance from a grey patch (x,y,width,height)
        #[arg(long, value_name = "X,Y,W,H")]
        wb_patch: Option<String>,

        /// Multiply the image brightness by a constant factor
        #[arg(long, value_name = "FLOAT")]
        scale: Option<f32>,

        /// Calibrate vignetting from this (flat-field) series and correct it
        #[arg(long, conflicts_with = "vcorr")]
        vcal: bool,

        /// Correct vignetting with known polynomial coefficients (a,b,c)
        #[arg(long, value_name = "A,B,C")]
        vcorr: Option<String>,

        /// Crop a rectangle (x,y,width,height) before resampling
        #[arg(long, value_name = "X,Y,W,H")]
        crop: Option<String>,

        /// Resample to WxH, or to a longest-edge size
        #[arg(long, value_name = "WxH|N")]
        resample: Option<String>,

        /// Reconstruction filter for resampling (lanczos, tent)
        #[arg(long, value_name = "FILTER", default_value = "lanczos")]
        rfilter: String,

        /// Rotate the output (0, 90, 180, 270 degrees)
        #[arg(long, value_name = "DEG", default_value = "0")]
        rotate: u32,

        /// Mirror the output about an axis (x, y, xy)
        #[arg(long, value_name = "AXES")]
        flip: Option<String>,

        /// Configuration file (default: hdrfuse.yml next to the inputs
        /// or in ~/.config/hdrfuse/)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Number of parallel threads
        #[arg(short = 'j', long, value_name = "N")]
        threads: Option<usize>,

        /// Suppress non-essential output
        #[arg(long)]
        silent: bool,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Inspect an exposure series without processing it
    Info {
        /// Input RAW files, or a printf-style pattern
        #[arg(value_name = "INPUTS", required = true)]
        inputs: Vec<PathBuf>,

        /// Output as JSON (machine-readable)
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Merge {
            inputs,
            out,
            format,
            colormode,
            saturation,
            exptimes,
            fit_exptimes,
            seed,
            no_demosaic,
            wb,
            wb_patch,
            scale,
            vcal,
            vcorr,
            crop,
            resample,
            rfilter,
            rotate,
            flip,
            config,
            threads,
            silent,
            verbose,
        } => cmd_merge(MergeArgs {
            inputs,
            out,
            format,
            colormode,
            saturation,
            exptimes,
            fit_exptimes,
            seed,
            no_demosaic,
            wb,
            wb_patch,
            scale,
            vcal,
            vcorr,
            crop,
            resample,
            rfilter,
            rotate,
            flip,
            config,
            threads,
            silent,
            verbose,
        }),

        Commands::Info { inputs, json } => cmd_info(inputs, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct MergeArgs {
    inputs: Vec<PathBuf>,
    out: Option<PathBuf>,
    format: Option<String>,
    colormode: Option<String>,
    saturation: Option<f32>,
    exptimes: Option<String>,
    fit_exptimes: bool,
    seed: u64,
    no_demosaic: bool,
    wb: Option<String>,
    wb_patch: Option<String>,
    scale: Option<f32>,
    vcal: bool,
    vcorr: Option<String>,
    crop: Option<String>,
    resample: Option<String>,
    rfilter: String,
    rotate: u32,
    flip: Option<String>,
    config: Option<PathBuf>,
    threads: Option<usize>,
    silent: bool,
    verbose: bool,
}

fn cmd_merge(args: MergeArgs) -> Result<(), String> {
    let start_time = Instant::now();

    hdrfuse_core::config::set_verbose(args.verbose);

    if let Some(num_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .map_err(|e| format!("Failed to configure thread pool: {}", e))?;
    }

    // Config file first, flags override
    let (config, config_source) = hdrfuse_core::config::load_config(args.config.as_deref())?;
    if let Some(source) = &config_source {
        if args.verbose {
            eprintln!("[verbose] Using configuration from {}", source.display());
        }
    }

    let format = match args.format.as_deref() {
        Some(format) => parse_format(format)?,
        None => config.format.unwrap_or(OutputFormat::Exr),
    };
    let colormode = match args.colormode.as_deref() {
        Some(mode) => parse_colormode(mode)?,
        None => config.colormode.unwrap_or(ColorMode::Native),
    };
    let sensor2xyz = config.sensor2xyz.unwrap_or(XYZ_FROM_SRGB);
    let saturation = args.saturation.or(config.saturation);
    let scale = args.scale.or(config.scale);

    let exptimes = match args.exptimes.as_deref() {
        Some(times) => Some(parse_exptimes(times)?),
        None => config.exptimes.clone(),
    };

    let white_balance = if let Some(wb) = args.wb.as_deref() {
        Some(WhiteBalance::Multipliers(parse_rgb(wb)?))
    } else if let Some(patch) = args.wb_patch.as_deref() {
        let (x, y, w, h) = parse_rect(patch)?;
        Some(WhiteBalance::Patch(x, y, w, h))
    } else {
        config.wb.map(WhiteBalance::Multipliers)
    };

    let vignetting = if args.vcal {
        Some(VignettingMode::Calibrate)
    } else if let Some(coefficients) = args.vcorr.as_deref() {
        Some(VignettingMode::Correct(parse_rgb(coefficients)?))
    } else {
        config.vcorr.map(VignettingMode::Correct)
    };

    let crop = match args.crop.as_deref() {
        Some(rect) => Some(parse_rect(rect)?),
        None => None,
    };
    let resample = match args.resample.as_deref() {
        Some(target) => Some((parse_resample_target(target)?, parse_filter(&args.rfilter)?)),
        None => None,
    };
    let rotate_flip = RotateFlip::new(args.rotate, args.flip.as_deref().unwrap_or(""))?;

    // Decode and validate the series
    let paths = hdrfuse_core::decoders::expand_inputs(&args.inputs)?;
    let mut series = hdrfuse_core::decoders::load_series(
        &paths,
        saturation,
        exptimes.as_deref(),
        args.silent,
    )?;

    let demosaic = !args.no_demosaic;
    if !demosaic && matches!(format, OutputFormat::Png | OutputFormat::Jpg | OutputFormat::Tiff16)
    {
        return Err(format!(
            "The {} format needs a demosaiced image (drop --no-demosaic)",
            format.extension()
        ));
    }

    let options = ProcessOptions {
        fit_exposure_times: args.fit_exptimes,
        seed: args.seed,
        fit_script_path: args
            .fit_exptimes
            .then(|| PathBuf::from("exptime_showfit.m")),
        demosaic,
        sensor2xyz,
        colormode,
        white_balance,
        scale,
        vignetting,
        crop,
        resample,
        rotate_flip,
        silent: args.silent,
    };
    hdrfuse_core::process_series(&mut series, &options)?;

    // Export
    let output_path = determine_output_path(&paths[0], &args.out, format)?;
    let (width, height) = (series.width, series.height);
    let channels = series.buffer.channels();
    let data = series
        .buffer
        .data()
        .ok_or_else(|| "Pipeline produced no image".to_string())?;

    if !args.silent {
        println!(
            "Writing {} ({}x{}, {} channel{}, {}) ..",
            output_path.display(),
            width,
            height,
            channels,
            if channels > 1 { "s" } else { "" },
            match format {
                OutputFormat::Exr => "half precision",
                OutputFormat::Exr32 => "single precision",
                OutputFormat::Png | OutputFormat::Jpg => "low dynamic range",
                OutputFormat::Tiff16 => "16-bit linear",
            }
        );
    }

    match format {
        OutputFormat::Exr | OutputFormat::Exr32 => hdrfuse_core::exporters::export_exr(
            &output_path,
            width,
            height,
            channels,
            data,
            &series.metadata,
            format == OutputFormat::Exr,
        )?,
        OutputFormat::Png | OutputFormat::Jpg => {
            hdrfuse_core::exporters::export_ldr(&output_path, width, height, data)?
        }
        OutputFormat::Tiff16 => {
            hdrfuse_core::exporters::export_tiff16(&output_path, width, height, data)?
        }
    }

    if !args.silent {
        println!(
            "Done! Merged image saved to: {} ({:.2}s)",
            output_path.display(),
            start_time.elapsed().as_secs_f64()
        );
    } else {
        println!("{}", output_path.display());
    }
    Ok(())
}

/// Series summary for `info --json`.
#[derive(Serialize)]
struct SeriesInfo {
    width: usize,
    height: usize,
    cfa: String,
    blacklevel: u16,
    whitepoint: u16,
    saturation: f32,
    metadata_entries: usize,
    exposures: Vec<ExposureInfo>,
}

#[derive(Serialize)]
struct ExposureInfo {
    file: String,
    exposure_time: f32,
    shown: String,
}

fn cmd_info(inputs: Vec<PathBuf>, json_output: bool) -> Result<(), String> {
    let paths = hdrfuse_core::decoders::expand_inputs(&inputs)?;
    let series = hdrfuse_core::decoders::load_series(&paths, None, None, true)?;

    let info = SeriesInfo {
        width: series.width,
        height: series.height,
        cfa: series.cfa.to_string(),
        blacklevel: series.blacklevel,
        whitepoint: series.whitepoint,
        saturation: series.saturation,
        metadata_entries: series.metadata.len(),
        exposures: series
            .exposures
            .iter()
            .map(|e| ExposureInfo {
                file: e.filename.display().to_string(),
                exposure_time: e.exposure,
                shown: e.shown_exposure.clone(),
            })
            .collect(),
    };

    if json_output {
        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| format!("Failed to serialize series info: {}", e))?;
        println!("{}", json);
    } else {
        println!("Series: {}x{} [CFA {}]", info.width, info.height, info.cfa);
        println!(
            "Levels: black {}, white {}, saturation {:.4}",
            info.blacklevel, info.whitepoint, info.saturation
        );
        println!("Exposures:");
        for exposure in &info.exposures {
            println!(
                "  {}  {}s ({})",
                exposure.file, exposure.exposure_time, exposure.shown
            );
        }
        println!("Collected {} metadata entries.", info.metadata_entries);
    }

    Ok(())
}
