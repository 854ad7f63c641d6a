// Copyright 2018 Ian Johnson

// This file is part of Chip-8.

// Chip-8 is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Chip-8 is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Chip-8.  If not, see <http://www.gnu.org/licenses/>.

//! The `chip8run` binary program.
//!
//! Runs a program without any window for a fixed number of steps and then
//! prints the screen to standard output.  This is mostly useful for checking
//! what a program draws, or for tracing its execution with `-vvv`.

extern crate chip8vm;
extern crate clap;
extern crate env_logger;
extern crate failure;
#[macro_use]
extern crate log;

use std::io::{self, Write};
use std::process;
use std::thread;

use clap::{App, Arg, ArgMatches};
use failure::{Error, ResultExt};
use log::LevelFilter;

use chip8vm::timer::Timer;
use chip8vm::Interpreter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let matches = App::new("chip8run")
        .version(VERSION)
        .author("Ian Johnson <ianprime0509@gmail.com>")
        .about("Runs a Chip-8 program headless and prints the final screen")
        .help_message("show this help message and exit")
        .version_message("show version information and exit")
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("N")
                .help("set the number of cycles to run (default 1000)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("frequency")
                .long("frequency")
                .value_name("FREQ")
                .help("run cycles at the given rate (in Hz) instead of as fast as possible")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("increase verbosity"),
        )
        .arg(
            Arg::with_name("FILE")
                .help("set the program file to run")
                .required(true)
                .index(1),
        )
        .get_matches();

    let filter = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter(None, filter)
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
        .init();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        for cause in e.causes().skip(1) {
            info!("caused by: {}", cause);
        }
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), Error> {
    let cycles = matches
        .value_of("cycles")
        .map(|n| n.parse::<u64>())
        .unwrap_or(Ok(1000))
        .context("invalid cycles argument")?;
    let mut timer = match matches.value_of("frequency") {
        Some(freq) => Some(Timer::new(
            freq.parse::<u32>().context("invalid frequency argument")?,
        )),
        None => None,
    };

    let filename = matches.value_of("FILE").unwrap();
    let mut interpreter = Interpreter::new();
    interpreter
        .load_file(filename)
        .with_context(|_| format!("could not load program from file '{}'", filename))?;

    let mut executed = 0;
    'main: while executed < cycles {
        let batch = match timer {
            Some(ref mut timer) => timer.lap() as u64,
            None => cycles - executed,
        };
        for _ in 0..batch.min(cycles - executed) {
            if interpreter.ran_off_end() {
                info!("program counter ran past the end of the program");
                break 'main;
            }
            interpreter
                .step()
                .with_context(|_| format!("fault after {} cycles", executed))?;
            executed += 1;
        }
        thread::yield_now();
    }
    info!("ran {} cycles", executed);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write!(out, "{}", interpreter.display())?;
    Ok(())
}
