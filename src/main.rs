//! KropScan CLI
//!
//! Command-line front end for the crop-disease inference core: diagnose a
//! leaf photo, inspect image quality, or list the class table.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use kropscan_core::logging::{init_logging, LogConfig};
use kropscan_core::{
    ClassTable, Decision, DiagnosisEngine, EngineConfig, EnginePaths, PredictOptions,
    StubClassifier,
};

/// KropScan crop disease diagnosis
#[derive(Parser, Debug)]
#[command(name = "kropscan")]
#[command(version)]
#[command(about = "Crop disease diagnosis from leaf photos", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Diagnose a single leaf image
    Diagnose {
        /// Path to the input image (JPEG or PNG)
        #[arg(short, long)]
        input: PathBuf,

        /// Path to trained model weights
        #[arg(short, long, default_value = "data/model.json")]
        model: PathBuf,

        /// Path to the class-name table (JSON array)
        #[arg(long)]
        class_names: Option<PathBuf>,

        /// Path to the engine configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the calibration configuration
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Path to the treatment advisory table
        #[arg(long)]
        treatments: Option<PathBuf>,

        /// Run with the deterministic stub classifier (no weights needed)
        #[arg(long, default_value = "false")]
        stub: bool,

        /// Disable test-time augmentation
        #[arg(long, default_value = "false")]
        no_tta: bool,

        /// Run inference even when the quality gate flags the image
        #[arg(long, default_value = "false")]
        force: bool,

        /// Emit the full report as JSON instead of the summary view
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Assess image quality without running inference
    Quality {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the class table
    Classes {
        /// Path to the class-name table (JSON array)
        #[arg(long)]
        class_names: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Diagnose {
            input,
            model,
            class_names,
            config,
            calibration,
            treatments,
            stub,
            no_tta,
            force,
            json,
        } => {
            let paths = EnginePaths {
                model,
                class_names,
                config,
                calibration,
                treatments,
            };
            cmd_diagnose(&input, &paths, stub, no_tta, force, json)
        }
        Commands::Quality { input } => cmd_quality(&input),
        Commands::Classes { class_names } => cmd_classes(class_names.as_deref()),
    }
}

fn build_engine(paths: &EnginePaths, stub: bool) -> Result<DiagnosisEngine> {
    if stub {
        let config = match &paths.config {
            Some(p) => EngineConfig::load(p)?,
            None => EngineConfig::default(),
        };
        let classes = match &paths.class_names {
            Some(p) => ClassTable::load(p)?,
            None => ClassTable::default(),
        };
        let classifier = StubClassifier::new(classes.len());
        DiagnosisEngine::with_classifier(config, classes, Box::new(classifier), paths)
            .context("failed to construct stub engine")
    } else {
        DiagnosisEngine::initialize(paths).context("failed to initialize engine")
    }
}

fn cmd_diagnose(
    input: &std::path::Path,
    paths: &EnginePaths,
    stub: bool,
    no_tta: bool,
    force: bool,
    json: bool,
) -> Result<()> {
    let engine = build_engine(paths, stub)?;
    let bytes = std::fs::read(input)
        .with_context(|| format!("failed to read image {}", input.display()))?;

    let options = PredictOptions {
        use_tta: if no_tta { Some(false) } else { None },
        tta_size: None,
        force_inference: force,
    };

    let report = engine.predict_or_escalate(&bytes, &options)?;

    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!("{}", "KropScan Diagnosis".green().bold());
    println!("  image:    {}", input.display());
    println!(
        "  quality:  {:.1} ({})",
        report.quality.quality_score, report.quality.description
    );

    match &report.primary_prediction {
        Some(p) => {
            println!("  class:    {}", p.class_name.cyan().bold());
            println!(
                "  confidence: {:.1}% raw, {:.1}% calibrated",
                p.raw_confidence * 100.0,
                p.calibrated_confidence * 100.0
            );
            println!(
                "  agreement: {:.0}%  uncertainty: {:.2}",
                p.ensemble_agreement * 100.0,
                p.uncertainty
            );
            if let Some(level) = report.confidence_level {
                println!("  level:    {}", level);
            }
        }
        None => println!("  class:    {}", "not determined".yellow()),
    }

    let decision = match report.decision {
        Decision::Accept => "ACCEPT".green().bold(),
        Decision::AcceptWithCaveat => "ACCEPT WITH CAVEAT".yellow().bold(),
        Decision::Escalate => "ESCALATE".red().bold(),
    };
    println!("  decision: {}", decision);
    if let Some(reason) = &report.decision_reason {
        println!("  reason:   {}", reason);
    }
    if let Some(treatment) = &report.treatment {
        println!("  severity: {}", treatment.severity);
    }
    println!("\n{}", report.recommendation);

    Ok(())
}

fn cmd_quality(input: &std::path::Path) -> Result<()> {
    let bytes = std::fs::read(input)
        .with_context(|| format!("failed to read image {}", input.display()))?;

    let preprocessor = kropscan_core::ImagePreprocessor::new(224);
    let image = preprocessor.decode(&bytes)?;
    let assessment = kropscan_core::QualityGate::default().assess(&image)?;

    println!("{}", "Image Quality".green().bold());
    println!("  score:       {:.1} / 100", assessment.quality_score);
    println!("  description: {}", assessment.description);
    println!("  brightness:  {:.1}", assessment.brightness);
    println!("  contrast:    {:.1}", assessment.contrast);
    println!("  sharpness:   {:.1}", assessment.sharpness);
    println!(
        "  resolution:  {}x{}",
        assessment.resolution.0, assessment.resolution.1
    );
    for rec in &assessment.recommendations {
        println!("  - {}", rec);
    }

    Ok(())
}

fn cmd_classes(class_names: Option<&std::path::Path>) -> Result<()> {
    let table = match class_names {
        Some(p) => ClassTable::load(p)?,
        None => ClassTable::default(),
    };

    println!("{} ({} classes)", "Class Table".green().bold(), table.len());
    for (i, name) in table.names().enumerate() {
        println!("  {:2}  {}", i, name);
    }

    Ok(())
}
