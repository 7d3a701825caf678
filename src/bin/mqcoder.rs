//! mqcoder CLI - MQ arithmetic coder diagnostic utility.
//!
//! Codes the bits of an input file against a single adaptive context and
//! reports coded lengths per policy. A probe tool for the raw coder; the
//! stream it produces carries no framing.

use clap::{Parser, Subcommand};
use mqcoder_rs::table::QE_TABLE;
use mqcoder_rs::{LengthComputation, MqDecoder, MqEncoder, Termination};
use std::fs;
use std::path::PathBuf;

/// MQ binary arithmetic coder probe tool
#[derive(Parser)]
#[command(name = "mqcoder")]
#[command(version)]
#[command(about = "Encode raw bits with the MQ coder and inspect lengths", long_about = None)]
#[command(after_help = "EXAMPLES:
    mqcoder encode -i payload.bin
    mqcoder encode -i payload.bin -t 1 -l 2 --checkpoint 4096
    mqcoder table")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode the bits of a file (MSB first) against one adaptive context
    #[command(visible_alias = "e")]
    Encode {
        /// Input file whose bits are coded
        #[arg(short, long)]
        input: PathBuf,

        /// Termination policy code (0=full, 1=near-optimal, 2=easy, 3=predictable-error)
        #[arg(short, long, default_value = "0")]
        termination: u8,

        /// Length computation policy code (0=lazy, 1=lazy-good, 2=near-optimal)
        #[arg(short, long, default_value = "2")]
        length: u8,

        /// Query a provisional length every N symbols (0 = never)
        #[arg(long, default_value = "0")]
        checkpoint: usize,

        /// Decode the result again and verify it matches the input bits
        #[arg(long)]
        verify: bool,
    },

    /// Print the 47-state probability transition table
    #[command(visible_alias = "t")]
    Table,
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Encode {
            input,
            termination,
            length,
            checkpoint,
            verify,
        } => {
            if let Err(message) = encode(&input, termination, length, checkpoint, verify) {
                eprintln!("error: {message}");
                std::process::exit(1);
            }
        }
        Commands::Table => table(),
    }
}

fn encode(
    input: &PathBuf,
    termination: u8,
    length: u8,
    checkpoint: usize,
    verify: bool,
) -> Result<(), String> {
    let termination = Termination::from_code(termination).map_err(|e| e.to_string())?;
    let length = LengthComputation::from_code(length).map_err(|e| e.to_string())?;
    let data = fs::read(input).map_err(|e| format!("{}: {e}", input.display()))?;

    let bits: Vec<u8> = data
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |shift| (byte >> shift) & 1))
        .collect();

    let mut encoder = MqEncoder::new(&[0]).map_err(|e| e.to_string())?;
    encoder.set_termination(termination);
    encoder.set_length_computation(length);

    let mut rates = Vec::new();
    for (i, &bit) in bits.iter().enumerate() {
        encoder.code_symbol(bit, 0);
        if checkpoint > 0 && (i + 1) % checkpoint == 0 {
            rates.push(encoder.num_coded_bytes());
        }
    }
    let coded_len = encoder.terminate();
    let n = rates.len();
    encoder.finish_length_calculation(&mut rates, n);

    println!("input:        {} bytes ({} bits)", data.len(), bits.len());
    println!("coded:        {} bytes ({termination:?} termination)", coded_len);
    if !rates.is_empty() {
        println!("checkpoints:  every {checkpoint} symbols ({length:?})");
        println!("rates:        {rates:?}");
    }

    if verify {
        let coded = encoder.coded_bytes().to_vec();
        let mut decoder = MqDecoder::new(&coded, &[0]).map_err(|e| e.to_string())?;
        for (i, &bit) in bits.iter().enumerate() {
            let decoded = decoder.decode_symbol(0);
            if decoded != bit {
                return Err(format!("round-trip mismatch at bit {i}"));
            }
        }
        println!("verify:       {} bits decoded back intact", bits.len());
    }
    Ok(())
}

fn table() {
    println!("index    qe  nmps  nlps  switch");
    for (i, entry) in QE_TABLE.iter().enumerate() {
        println!(
            "{i:5}  {:04X}  {:4}  {:4}  {:6}",
            entry.qe, entry.nmps, entry.nlps, entry.switch
        );
    }
}
