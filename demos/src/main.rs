//! Disassembles an ispnub script image into a human-readable opcode listing.
//!
//! Read-only: this does not validate wire framing against real hardware, it
//! just walks the same flat opcode stream `script::Interpreter::run` walks
//! and prints each record. A companion to, not a replacement for, running
//! the script for real.

use clap::Parser;
use log::{error, info};
use std::fs;
use std::process;

const OP_CONNECT: u8 = 0x01;
const OP_DISCONNECT: u8 = 0x02;
const OP_SPI_SEND: u8 = 0x03;
const OP_SPI_VERIFY: u8 = 0x04;
const OP_FLASH: u8 = 0x05;
const OP_WAIT: u8 = 0x06;
const OP_DECCOUNTER: u8 = 0x07;
const OP_EEPROM: u8 = 0x08;
const OP_END: u8 = 0xFF;

#[derive(Parser, Debug)]
#[command(about = "Disassemble an ispnub script image")]
struct Options {
    /// Path to the raw script image
    path: String,

    /// Enable verbose (debug-level) logging
    #[arg(long, short)]
    verbose: bool,
}

type Error = Box<dyn std::error::Error>;
type Result<T> = std::result::Result<T, Error>;

fn main() {
    let opts = Options::parse();
    env_logger::Builder::new()
        .filter_level(if opts.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if let Err(e) = run(&opts) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(opts: &Options) -> Result<()> {
    let image = fs::read(&opts.path)?;
    info!("loaded {} bytes from {}", image.len(), opts.path);
    disassemble(&image)
}

/// Errors out (rather than guessing) on truncated records: a short read at
/// the tail of a real image means the image is corrupt, not that
/// disassembly should silently stop early.
fn disassemble(image: &[u8]) -> Result<()> {
    let mut cursor = 0usize;

    let fetch_u8 = |image: &[u8], cursor: &mut usize| -> Result<u8> {
        let byte = *image
            .get(*cursor)
            .ok_or("script image ends mid-instruction")?;
        *cursor += 1;
        Ok(byte)
    };
    let fetch_u16 = |image: &[u8], cursor: &mut usize| -> Result<u16> {
        let hi = fetch_u8(image, cursor)? as u16;
        let lo = fetch_u8(image, cursor)? as u16;
        Ok((hi << 8) | lo)
    };
    let fetch_u32 = |image: &[u8], cursor: &mut usize| -> Result<u32> {
        let mut v = 0u32;
        for _ in 0..4 {
            v = (v << 8) | fetch_u8(image, cursor)? as u32;
        }
        Ok(v)
    };
    let fetch_frame = |image: &[u8], cursor: &mut usize| -> Result<[u8; 4]> {
        let mut frame = [0u8; 4];
        for b in frame.iter_mut() {
            *b = fetch_u8(image, cursor)?;
        }
        Ok(frame)
    };

    loop {
        let offset = cursor;
        let opcode = fetch_u8(image, &mut cursor)?;

        match opcode {
            OP_CONNECT => {
                let sck_option = fetch_u8(image, &mut cursor)?;
                println!("{offset:06x}  CONNECT      sck_option={sck_option:#04x}");
            }
            OP_DISCONNECT => {
                println!("{offset:06x}  DISCONNECT");
            }
            OP_SPI_SEND => {
                let frame = fetch_frame(image, &mut cursor)?;
                println!("{offset:06x}  SPI_SEND     {}", hex_frame(&frame));
            }
            OP_SPI_VERIFY => {
                let frame = fetch_frame(image, &mut cursor)?;
                let expected = fetch_u8(image, &mut cursor)?;
                println!(
                    "{offset:06x}  SPI_VERIFY   {} expect byte[3]={expected:#04x}",
                    hex_frame(&frame)
                );
            }
            OP_FLASH | OP_EEPROM => {
                let address = fetch_u32(image, &mut cursor)?;
                let length = fetch_u32(image, &mut cursor)?;
                let page_size = fetch_u16(image, &mut cursor)?;
                let name = if opcode == OP_FLASH { "FLASH" } else { "EEPROM" };
                println!(
                    "{offset:06x}  {name:<12} address={address:#010x} length={length} page_size={page_size}"
                );
                cursor = cursor
                    .checked_add(length as usize)
                    .ok_or("script image length overflows a host usize")?;
                if cursor > image.len() {
                    return Err("script image ends mid-page-data".into());
                }
            }
            OP_WAIT => {
                let units = fetch_u8(image, &mut cursor)?;
                println!("{offset:06x}  WAIT         {units} x 10ms");
            }
            OP_DECCOUNTER => {
                let startvalue = fetch_u16(image, &mut cursor)?;
                println!("{offset:06x}  DECCOUNTER   startvalue={startvalue}");
            }
            OP_END => {
                println!("{offset:06x}  END");
                return Ok(());
            }
            unknown => {
                return Err(format!("unknown opcode {unknown:#04x} at offset {offset:#06x}").into());
            }
        }
    }
}

fn hex_frame(frame: &[u8; 4]) -> String {
    frame.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_a_connect_then_end_script() {
        let image = [OP_CONNECT, 0x01, OP_END];
        disassemble(&image).unwrap();
    }

    #[test]
    fn flash_record_skips_over_its_page_data() {
        let mut image = vec![OP_FLASH];
        image.extend_from_slice(&4u32.to_be_bytes()); // address
        image.extend_from_slice(&2u32.to_be_bytes()); // length
        image.extend_from_slice(&64u16.to_be_bytes()); // page_size
        image.extend_from_slice(&[0xAA, 0xBB]); // page data
        image.push(OP_END);
        disassemble(&image).unwrap();
    }

    #[test]
    fn truncated_frame_is_an_error_not_a_panic() {
        let image = [OP_SPI_SEND, 0x00, 0x00];
        assert!(disassemble(&image).is_err());
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let image = [0x42, OP_END];
        assert!(disassemble(&image).is_err());
    }
}
