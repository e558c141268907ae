//! Stack-trace parsing.
//!
//! Two line grammars are tried per line, in order: the V8 form
//! `at <fn> (<file>:<line>:<col>)` and the SpiderMonkey form
//! `<fn>@<file>:<line>:<col>`. Lines matching neither, and frames whose
//! file is the anonymous placeholder, are dropped. Trace order is
//! preserved.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::StackFrame;

static V8_FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*at\s+(?P<func>.+?)\s+\((?P<file>.+?):(?P<line>\d+):(?P<col>\d+)\)\s*$")
        .expect("v8 frame regex")
});

static SPIDERMONKEY_FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<func>[^@\s]*)@(?P<file>.+?):(?P<line>\d+):(?P<col>\d+)\s*$")
        .expect("spidermonkey frame regex")
});

const ANONYMOUS_FILE: &str = "<anonymous>";

pub fn parse_stack(stack: &str) -> Vec<StackFrame> {
    stack.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<StackFrame> {
    let caps = V8_FRAME_RE
        .captures(line)
        .or_else(|| SPIDERMONKEY_FRAME_RE.captures(line))?;
    let filename = caps.name("file")?.as_str().to_string();
    if filename == ANONYMOUS_FILE {
        return None;
    }
    let function_name = match caps.name("func").map(|m| m.as_str().trim()) {
        Some("") | None => None,
        Some(name) => Some(name.to_string()),
    };
    Some(StackFrame {
        function_name,
        filename,
        lineno: caps.name("line")?.as_str().parse().ok()?,
        colno: caps.name("col")?.as_str().parse().ok()?,
    })
}
