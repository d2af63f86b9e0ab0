//! Text branch traces.
//!
//! One branch per line: `<pc> <target> <T|N> <kind>`, addresses in hex
//! (the `0x` prefix is optional), kind one of `cond`, `uncond`, `indirect`,
//! `call`, `ret`. Everything after `#` is a comment.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use super::{Branch, BranchKind};
use crate::error::{Error, Result};

pub struct TraceReader<R> {
    lines: Lines<R>,
    line: usize,
}

impl TraceReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

fn parse_addr(field: &str) -> std::result::Result<u64, String> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    u64::from_str_radix(digits, 16).map_err(|e| format!("bad address '{field}': {e}"))
}

/// Parses the non-comment part of one trace line.
pub fn parse_record(text: &str) -> std::result::Result<Branch, String> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let &[pc, target, dir, kind] = fields.as_slice() else {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    };
    let taken = match dir {
        "T" | "t" => true,
        "N" | "n" => false,
        other => return Err(format!("direction must be T or N, found '{other}'")),
    };
    let kind: BranchKind = kind.parse()?;
    if !taken && kind != BranchKind::Conditional {
        return Err(format!("{} branch marked not taken", kind.mnemonic()));
    }
    Ok(Branch {
        pc: parse_addr(pc)?,
        target: parse_addr(target)?,
        taken,
        kind,
    })
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<Branch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(Error::Io(e))),
            };
            self.line += 1;
            let text = raw.split('#').next().unwrap_or("").trim();
            if text.is_empty() {
                continue;
            }
            return Some(parse_record(text).map_err(|message| Error::Trace {
                line: self.line,
                message,
            }));
        }
    }
}
