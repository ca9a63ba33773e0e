use anyhow::Result;
use arbophyl::{self, Args, LogLevel, LOG_FILE};
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use std::{
    fs::{self, File},
    io::Write,
};

// --------------------------------------------------
fn main() {
    if let Err(e) = run(Args::parse()) {
        eprintln!("{} {e}", "Error:".red().bold());
        std::process::exit(1);
    }
}

// --------------------------------------------------
fn run(args: Args) -> Result<()> {
    if !args.output.is_dir() {
        fs::create_dir_all(&args.output)?;
    }

    // All logging goes into the output folder
    env_logger::Builder::new()
        .filter_level(match args.log {
            Some(LogLevel::Debug) => log::LevelFilter::Debug,
            Some(LogLevel::Info) => log::LevelFilter::Info,
            _ => log::LevelFilter::Warn,
        })
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(File::create(
            args.output.join(LOG_FILE),
        )?)))
        .init();

    arbophyl::run(args)?;
    title();
    println!(
        "Finished all processes, thank you for using {}Phyl!\n",
        "Arbo".green()
    );

    Ok(())
}

// --------------------------------------------------
fn title() {
    let art = [
        ("    ___       _", "           ______ _           _   "),
        ("   / _ \\     | |", "          | ___ \\ |         | |  "),
        ("  / /_\\ \\_ __| |__   ___ ", " | |_/ / |__  _   _| |  "),
        ("  |  _  | '__| '_ \\ / _ \\", " |  __/| '_ \\| | | | |  "),
        ("  | | | | |  | |_) | (_) |", "| |   | | | | |_| | |  "),
        ("  \\_| |_/_|  |_.__/ \\___/", " \\_|   |_| |_|\\__, |_|  "),
    ];

    let border = format!("+{}+", "-".repeat(49));
    println!("\n{border}");
    for (arbo, phyl) in art {
        println!("|{}{}|", arbo.green(), phyl);
    }
    println!("|                     ----------+        __/ |    |");
    println!("|     --------------------+     |-------|___/     |");
    println!("|                         |-----+                 |");
    println!("|           --------------+                       |");
    println!("{border}\n");
}
