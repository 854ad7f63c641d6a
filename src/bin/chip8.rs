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

//! The `chip8` binary program.
//!
//! Runs a program in an SDL window.  The keypad is the 4x4 block of keys from
//! `1` to `V` on a QWERTY keyboard, read row by row as keys `0` through `F`:
//!
//! ```text
//! 1 2 3 4      0 1 2 3
//! Q W E R  ->  4 5 6 7
//! A S D F      8 9 A B
//! Z X C V      C D E F
//! ```
//!
//! Escape quits, as does running past the end of the program.

extern crate chip8vm;
extern crate clap;
extern crate env_logger;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
extern crate sdl2;

use std::io::Write;
use std::process;
use std::str::FromStr;
use std::thread;

use clap::{App, Arg, ArgMatches};
use failure::{Error, Fail, ResultExt};
use log::LevelFilter;
use sdl2::audio::{AudioCallback, AudioSpecDesired};
use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Scancode;
use sdl2::pixels::Color;
use sdl2::rect::Rect;
use sdl2::render::Canvas;
use sdl2::video::Window;
use sdl2::EventPump;

use chip8vm::display::{self, HEIGHT, WIDTH};
use chip8vm::input::N_KEYS;
use chip8vm::timer::Timer;
use chip8vm::Interpreter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The most cycles to run between two polls of the keyboard, so that a
/// stalled window doesn't make us try to catch up all at once.
const MAX_BATCH: u32 = 64;

/// The pitch of the buzzer, in Hz.
const TONE: u32 = 440;

/// The physical key for each keypad key, indexed by keypad key.
const KEYPAD: [Scancode; N_KEYS] = [
    Scancode::Num1,
    Scancode::Num2,
    Scancode::Num3,
    Scancode::Num4,
    Scancode::Q,
    Scancode::W,
    Scancode::E,
    Scancode::R,
    Scancode::A,
    Scancode::S,
    Scancode::D,
    Scancode::F,
    Scancode::Z,
    Scancode::X,
    Scancode::C,
    Scancode::V,
];

/// An SDL error.
#[derive(Debug, Fail)]
#[fail(display = "SDL error: {}", _0)]
struct SdlError(String);

/// The window the framebuffer is painted into.
struct Screen {
    canvas: Canvas<Window>,
    lit: Color,
    unlit: Color,
}

impl Screen {
    /// Opens a window showing each pixel as a `scale` by `scale` square.
    fn open(video: &sdl2::VideoSubsystem, scale: u32) -> Result<Self, Error> {
        let window = video
            .window("chip8vm", WIDTH as u32 * scale, HEIGHT as u32 * scale)
            .build()?;
        let canvas = window.into_canvas().build()?;
        Ok(Screen {
            canvas,
            lit: Color::RGB(255, 255, 255),
            unlit: Color::RGB(0, 0, 0),
        })
    }

    /// Paints the whole framebuffer, stretched to the current window size.
    fn paint(&mut self, buffer: &display::Buffer) -> Result<(), SdlError> {
        let (width, height) = self.canvas.window().size();
        let (cw, ch) = (width / WIDTH as u32, height / HEIGHT as u32);
        let cells: Vec<Rect> = buffer
            .data()
            .iter()
            .enumerate()
            .flat_map(|(x, col)| {
                col.iter()
                    .enumerate()
                    .filter(|&(_, &pixel)| pixel)
                    .map(move |(y, _)| Rect::new(x as i32 * cw as i32, y as i32 * ch as i32, cw, ch))
            })
            .collect();

        self.canvas.set_draw_color(self.unlit);
        self.canvas.clear();
        self.canvas.set_draw_color(self.lit);
        self.canvas.fill_rects(&cells).map_err(SdlError)?;
        self.canvas.present();
        Ok(())
    }
}

/// A square wave at a fixed pitch.
struct Buzzer {
    amplitude: f32,
    /// The number of samples in half a period.
    half_period: u32,
    /// The position within the current period, in samples.
    position: u32,
}

impl Buzzer {
    fn new(volume: u32, sample_rate: i32) -> Self {
        Buzzer {
            amplitude: volume.min(100) as f32 / 100.0,
            half_period: (sample_rate as u32 / (2 * TONE)).max(1),
            position: 0,
        }
    }
}

impl AudioCallback for Buzzer {
    type Channel = f32;

    fn callback(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = if self.position < self.half_period {
                self.amplitude
            } else {
                -self.amplitude
            };
            self.position = (self.position + 1) % (2 * self.half_period);
        }
    }
}

/// Reads the pressed state of every keypad key from the keyboard.
fn read_keypad(event_pump: &EventPump) -> [bool; N_KEYS] {
    let keyboard = event_pump.keyboard_state();
    let mut keys = [false; N_KEYS];
    for (key, &scancode) in keys.iter_mut().zip(KEYPAD.iter()) {
        *key = keyboard.is_scancode_pressed(scancode);
    }
    keys
}

/// Parses the value of the named argument, if it was given.
fn parse_arg<T>(matches: &ArgMatches, name: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: Fail,
{
    match matches.value_of(name) {
        Some(value) => Ok(value
            .parse()
            .with_context(|_| format!("invalid {} argument '{}'", name, value))?),
        None => Ok(default),
    }
}

fn main() {
    let matches = App::new("chip8")
        .version(VERSION)
        .author("Ian Johnson <ianprime0509@gmail.com>")
        .about("Runs a Chip-8 program in a window")
        .help_message("show this help message and exit")
        .version_message("show version information and exit")
        .arg(
            Arg::with_name("frequency")
                .short("f")
                .long("frequency")
                .value_name("FREQ")
                .help("set the number of cycles run per second (default 500)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("scale")
                .short("s")
                .long("scale")
                .value_name("SCALE")
                .help("set the size of a pixel on screen (default 10)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("volume")
                .long("volume")
                .value_name("VOL")
                .help("set the buzzer volume, 0-100 (default 10)")
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
    let frequency = parse_arg(matches, "frequency", 500u32)?;
    let scale = parse_arg(matches, "scale", 10u32)?;
    let volume = parse_arg(matches, "volume", 10u32)?;

    let filename = matches.value_of("FILE").unwrap();
    let mut interpreter = Interpreter::new();
    interpreter
        .load_file(filename)
        .with_context(|_| format!("could not load program from file '{}'", filename))?;

    let sdl_context = sdl2::init()
        .map_err(SdlError)
        .context("could not initialize SDL")?;
    let video = sdl_context
        .video()
        .map_err(SdlError)
        .context("could not initialize SDL video subsystem")?;
    let audio = sdl_context
        .audio()
        .map_err(SdlError)
        .context("could not initialize SDL audio subsystem")?;
    let mut event_pump = sdl_context
        .event_pump()
        .map_err(SdlError)
        .context("could not initialize SDL event loop")?;
    let mut screen = Screen::open(&video, scale)?;
    let buzzer = audio
        .open_playback(
            None,
            &AudioSpecDesired {
                freq: Some(44100),
                channels: Some(1),
                samples: None,
            },
            |spec| Buzzer::new(volume, spec.freq),
        )
        .map_err(SdlError)
        .context("could not open audio device")?;

    let mut timer = Timer::new(frequency);
    interpreter.display_mut().force_refresh();
    'main: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => break 'main,
                Event::Window {
                    win_event: WindowEvent::Exposed,
                    ..
                } => interpreter.display_mut().force_refresh(),
                _ => {}
            }
        }
        if event_pump.keyboard_state().is_scancode_pressed(Scancode::Escape) {
            break;
        }
        interpreter.set_keys(&read_keypad(&event_pump));

        for _ in 0..timer.lap().min(MAX_BATCH) {
            if interpreter.ran_off_end() {
                info!("program counter ran past the end of the program");
                break 'main;
            }
            interpreter
                .step()
                .with_context(|_| format!("fault at {:#05X}", interpreter.pc()))?;
        }

        interpreter
            .display_mut()
            .refresh(|buffer| screen.paint(buffer))
            .context("could not refresh display window")?;
        if interpreter.play_sound() {
            buzzer.resume();
        } else {
            buzzer.pause();
        }
        thread::yield_now();
    }

    Ok(())
}
