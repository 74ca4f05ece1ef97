// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Whitespace steganography CLI (spec.md §6): hide a payload in the
//! trailing whitespace of a cover text, or recover one from a stego text.

use anyhow::{ensure, Context, Result};
use pipeline::{embed, estimate_capacity, extract, PipelineConfig};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read, Write},
    path::PathBuf,
    process,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "wstego",
    about = "Hide or recover a message in the trailing whitespace of a text file"
)]
struct Opt {
    /// Compress the message with the built-in Huffman table before encrypting
    #[structopt(short = "C")]
    compress: bool,

    /// Suppress the advisory usage/capacity report on stderr
    #[structopt(short = "Q")]
    quiet: bool,

    /// Print the cover text's estimated storage capacity and exit
    #[structopt(short = "S")]
    capacity: bool,

    /// Password used to key the cipher; embedding and extraction without a
    /// matching password leave the payload unrecovered, not rejected
    #[structopt(short = "p")]
    password: Option<String>,

    /// Target line length used to decide when a cover line is full
    #[structopt(short = "l", default_value = "80")]
    line_length: usize,

    /// Read the message to embed from this file
    #[structopt(short = "f", parse(from_os_str), conflicts_with = "message")]
    message_file: Option<PathBuf>,

    /// Embed this literal string as the message
    #[structopt(short = "m", conflicts_with = "message_file")]
    message: Option<String>,

    /// Cover text (embedding) or stego text (extraction); stdin if absent
    #[structopt(parse(from_os_str))]
    infile: Option<PathBuf>,

    /// Destination file; stdout if absent
    #[structopt(parse(from_os_str))]
    outfile: Option<PathBuf>,
}

fn init_logging(quiet: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if quiet && std::env::var("RUST_LOG").is_err() {
        builder.filter_level(log::LevelFilter::Error);
    }
    builder.init();
}

fn open_input(path: &Option<PathBuf>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(p) => {
            let f = File::open(p).with_context(|| format!("opening {}", p.display()))?;
            Ok(Box::new(BufReader::new(f)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn open_output(path: &Option<PathBuf>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) => {
            let f = File::create(p).with_context(|| format!("creating {}", p.display()))?;
            Ok(Box::new(f))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

fn read_message(opt: &Opt) -> Result<Vec<u8>> {
    if let Some(text) = &opt.message {
        return Ok(text.clone().into_bytes());
    }
    if let Some(path) = &opt.message_file {
        let mut buf = Vec::new();
        File::open(path)
            .with_context(|| format!("opening {}", path.display()))?
            .read_to_end(&mut buf)?;
        return Ok(buf);
    }
    unreachable!("read_message called without -f or -m")
}

fn run(opt: Opt) -> Result<()> {
    ensure!(opt.line_length >= 8, "line length must be at least 8");

    let config = PipelineConfig::new(opt.compress, opt.quiet, opt.line_length);
    let password = opt.password.as_deref();

    if opt.capacity {
        let cover = open_input(&opt.infile)?;
        let capacity = estimate_capacity(cover, config.line_length)?;
        if !opt.quiet {
            eprintln!(
                "estimated capacity: {}-{} bits ({}-{} bytes)",
                capacity.n_lo,
                capacity.n_hi,
                capacity.n_lo / 8,
                capacity.n_hi / 8,
            );
        }
        return Ok(());
    }

    let embedding = opt.message.is_some() || opt.message_file.is_some();

    if embedding {
        let message = read_message(&opt)?;
        let cover = open_input(&opt.infile)?;
        let stego_out = open_output(&opt.outfile)?;

        let stats = embed(cover, stego_out, &message, &config, password)?;

        if !opt.quiet {
            if stats.lines_extra > 0 {
                eprintln!(
                    "warning: cover text too short, added {} extra line(s)",
                    stats.lines_extra
                );
            } else if stats.bits_available > 0 {
                let used_pct = stats.bits_used as f64 / stats.bits_available as f64 * 100.0;
                eprintln!(
                    "used {} of {} available bits ({:.1}%)",
                    stats.bits_used, stats.bits_available, used_pct
                );
            }
        }
    } else {
        let stego = open_input(&opt.infile)?;
        let message_out = open_output(&opt.outfile)?;
        extract(stego, message_out, &config, password)?;
    }

    Ok(())
}

fn main() {
    let opt = Opt::from_args();
    init_logging(opt.quiet);

    if let Err(err) = run(opt) {
        eprintln!("wstego: {err:#}");
        process::exit(1);
    }
}
