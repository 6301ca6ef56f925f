use std::fmt::Write as _;
use std::io::IsTerminal;

use chrono::SecondsFormat;
use owo_colors::OwoColorize;
use tracehouse_core::model::span::SpanRecord;
use tracehouse_core::model::trace::{DependencyLink, Trace};

pub fn print_names(names: &[String], noun: &str) {
    for name in names {
        println!("{name}");
    }
    println!("-- {} {noun} --", names.len());
}

pub fn print_trace_ids(ids: &[String]) {
    for id in ids {
        println!("trace={id}");
    }
    println!("-- {} traces --", ids.len());
}

pub fn print_traces_human(traces: &[Trace]) {
    let color = std::io::stdout().is_terminal();
    for trace in traces {
        print!("{}", render_trace(trace, color));
    }
    println!("-- {} traces --", traces.len());
}

pub fn print_dependencies_human(links: &[DependencyLink]) {
    for link in links {
        println!("{} -> {} calls={}", link.parent, link.child, link.call_count);
    }
    println!("-- {} dependencies --", links.len());
}

pub fn render_trace(trace: &Trace, color: bool) -> String {
    let duration_ms = match (trace.start(), trace.end()) {
        (Some(start), Some(end)) => millis((end - start).num_nanoseconds().unwrap_or(i64::MAX)),
        _ => 0.0,
    };
    let started = trace
        .start()
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "-".to_string());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "TRACE {} start={} duration={:.3}ms spans={} errors={}",
        trace.trace_id,
        started,
        duration_ms,
        trace.spans.len(),
        trace.error_count()
    );
    for root in trace.roots() {
        render_node(&mut out, trace, root, 1, color);
    }
    out
}

fn render_node(out: &mut String, trace: &Trace, span: &SpanRecord, depth: usize, color: bool) {
    let indent = "  ".repeat(depth);
    let status = if span.is_error() && color {
        span.status_code.red().to_string()
    } else {
        span.status_code.clone()
    };
    let _ = writeln!(
        out,
        "{indent}{} {} ({:.3}ms) {status}",
        span.service_name,
        span.operation_name,
        millis(span.duration_ns)
    );
    for child in trace.children(span.span_id) {
        render_node(out, trace, child, depth + 1, color);
    }
}

fn millis(nanos: i64) -> f64 {
    nanos as f64 / 1_000_000.0
}
