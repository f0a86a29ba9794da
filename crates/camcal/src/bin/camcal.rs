//! Command-line utilities around calibration sessions.
//!
//! Calibration itself is a library call (`CalibrationSession::run`) with a
//! caller-supplied solver; this binary covers the surrounding chores:
//! rendering printable boards, inspecting persisted artifacts, and checking
//! recorded-detections files against a session config.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use camcal::config::SessionConfig;
use camcal::replay::RecordedDetections;
use camcal::{load_intrinsics, render};

#[derive(Parser)]
#[command(name = "camcal", about = "Camera calibration session utilities")]
struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a printable chessboard calibration target as PNG.
    RenderBoard {
        /// Output image path.
        #[arg(long, default_value = "calib_board.png")]
        out: PathBuf,
        /// Image width in pixels.
        #[arg(long, default_value_t = 2592)]
        width: u32,
        /// Image height in pixels.
        #[arg(long, default_value_t = 2048)]
        height: u32,
        /// Square side in pixels.
        #[arg(long, default_value_t = 360)]
        square: u32,
    },
    /// Print the intrinsics stored in a calibration artifact.
    Show {
        /// Artifact path.
        artifact: PathBuf,
    },
    /// Validate a recorded-detections file against a session config.
    CheckDetections {
        /// Session config path.
        #[arg(long)]
        config: PathBuf,
        /// Recorded-detections path.
        #[arg(long)]
        detections: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = camcal::core::init_with_level(level);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::RenderBoard {
            out,
            width,
            height,
            square,
        } => {
            let board = render::chessboard_image(width, height, square);
            board.save(&out)?;
            println!("wrote {}x{} board to {}", width, height, out.display());
        }
        Command::Show { artifact } => {
            let (camera_matrix, distortion) = load_intrinsics(&artifact)?;
            println!("camera matrix:");
            for row in camera_matrix.to_rows() {
                println!("  [{:12.4} {:12.4} {:12.4}]", row[0], row[1], row[2]);
            }
            println!("distortion coefficients:");
            println!("  {:?}", distortion.0);
        }
        Command::CheckDetections { config, detections } => {
            let config = SessionConfig::load_json(&config)?;
            let geometry = config.board_geometry()?;
            let expected = geometry.point_count();
            let detections = RecordedDetections::load_json(&detections)?;

            let mut bad = 0usize;
            for (index, frame) in detections.frames.iter().enumerate() {
                if frame.found && frame.points.len() != expected {
                    eprintln!(
                        "frame {index}: {} points recorded, board has {expected}",
                        frame.points.len()
                    );
                    bad += 1;
                }
            }
            println!(
                "{} frames, {} found, {} with mismatched point counts",
                detections.len(),
                detections.found_count(),
                bad
            );
            if bad > 0 {
                return Err(format!("{bad} frames fail the point-count check").into());
            }
        }
    }
    Ok(())
}
