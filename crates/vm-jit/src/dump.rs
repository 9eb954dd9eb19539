//! Debug-only disassembly side channel.
//!
//! Writes the emitted code to `jit.bin`, disassembles it with the system
//! `objdump` into `jit.s`, and logs the result with each host line that
//! begins a guest instruction's translation prefixed by the decoded guest
//! instruction. Both temp files are removed before returning.

use std::fs;
use std::process::Command;

use log::debug;
use regex::Regex;

use vm_core::VmError;

use crate::map::AddrMap;

const BIN_DUMP_FILE: &str = "jit.bin";
const ASM_DUMP_FILE: &str = "jit.s";

/// objdump flavor for one target architecture.
pub struct DumpFormat {
    /// `-m` machine argument, e.g. `aarch64` or `i386:x86-64`.
    pub machine: &'static str,
    /// Additional syntax options, e.g. `-M intel`.
    pub options: &'static [&'static str],
}

pub(crate) fn dump_code(
    emitted: &[u8],
    base_addr: u64,
    fmt: &DumpFormat,
    map: &AddrMap,
    image: &[u8],
) -> Result<(), VmError> {
    fs::write(BIN_DUMP_FILE, emitted)?;

    let output = Command::new("objdump")
        .args(["-b", "binary", "-m", fmt.machine])
        .args(fmt.options)
        .arg(format!("--adjust-vma=0x{base_addr:x}"))
        .args(["-D", BIN_DUMP_FILE])
        .output()?;
    fs::write(ASM_DUMP_FILE, &output.stdout)?;

    let aa2va = map.inverse();
    let leading_addr = Regex::new(r"^([0-9a-fA-F]+):").expect("literal pattern");

    let listing = fs::read_to_string(ASM_DUMP_FILE)?;
    for line in listing.lines() {
        let line = line.trim_start();
        let va = leading_addr
            .captures(line)
            .and_then(|c| u64::from_str_radix(&c[1], 16).ok())
            .and_then(|aa| aa2va.get(&aa).copied());
        if let Some(va) = va
            && va != 0
            && let Some(d) = map.decoded(va)
        {
            debug!("");
            debug!("{}", d.trace_line(image));
            debug!("");
        }
        debug!("\t{line}");
    }

    fs::remove_file(BIN_DUMP_FILE)?;
    fs::remove_file(ASM_DUMP_FILE)?;
    Ok(())
}
