use std::fmt::Write as _;

use crate::error::{AppError, AppResult, SinkError};
use crate::metrics::Summary;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

pub(super) fn write_line(output: &mut String, line: &str) -> AppResult<()> {
    writeln!(output, "{}", line).map_err(|err| AppError::sink(SinkError::WriteLine { source: err }))
}

/// Renders hundredths as a fixed two-decimal number.
pub(super) fn format_x100(value: u64) -> String {
    format!(
        "{}.{:02}",
        value.checked_div(100).unwrap_or(0),
        value.checked_rem(100).unwrap_or(0)
    )
}

/// Microseconds as milliseconds with two decimals.
pub(super) fn format_ms(micros: u64) -> String {
    format!("{} ms", format_x100(micros.checked_div(10).unwrap_or(0)))
}

pub(super) fn format_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{} MiB", format_x100(scaled_x100(bytes, MIB)))
    } else if bytes >= KIB {
        format!("{} KiB", format_x100(scaled_x100(bytes, KIB)))
    } else {
        format!("{} B", bytes)
    }
}

fn scaled_x100(value: u64, unit: u64) -> u64 {
    let scaled = u128::from(value)
        .saturating_mul(100)
        .checked_div(u128::from(unit))
        .unwrap_or(0);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Human readable summary table.
///
/// # Errors
///
/// Returns an error if the output buffer cannot be written.
pub(super) fn render_text(summary: &Summary) -> AppResult<String> {
    let mut output = String::new();
    write_line(
        &mut output,
        &format!(
            "Summary for {} ({} connections, pipelining {}, {} workers)",
            summary.url, summary.connections, summary.pipelining, summary.workers
        ),
    )?;
    write_line(&mut output, "")?;

    let latency = &summary.latency;
    write_line(
        &mut output,
        &format!(
            "{:<10} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
            "Stat", "p50", "p90", "p99", "Avg", "Stdev", "Min", "Max"
        ),
    )?;
    write_line(
        &mut output,
        &format!(
            "{:<10} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
            "Latency",
            format_ms(latency.p50_us),
            format_ms(latency.p90_us),
            format_ms(latency.p99_us),
            format_ms(latency.mean_us),
            format_ms(latency.stddev_us),
            format_ms(latency.min_us),
            format_ms(latency.max_us)
        ),
    )?;

    let rate = &summary.requests_per_second;
    write_line(
        &mut output,
        &format!(
            "{:<10} {:>12} {:>12} {:>12} {:>12}",
            "Stat", "Avg", "Stdev", "Min", "Max"
        ),
    )?;
    write_line(
        &mut output,
        &format!(
            "{:<10} {:>12} {:>12} {:>12} {:>12}",
            "Req/Sec", rate.mean, rate.stddev, rate.min, rate.max
        ),
    )?;
    write_line(&mut output, "")?;

    write_line(
        &mut output,
        &format!(
            "{} requests in {}s, {} read",
            summary.total_requests,
            format_x100(summary.duration_ms.checked_div(10).unwrap_or(0)),
            format_bytes(summary.total_bytes)
        ),
    )?;
    write_line(
        &mut output,
        &format!(
            "Throughput: {} req/s, {}/s",
            summary.throughput.requests_per_sec,
            format_bytes(summary.throughput.bytes_per_sec)
        ),
    )?;

    let statuses = &summary.statuses;
    write_line(
        &mut output,
        &format!(
            "Status codes: 1xx={} 2xx={} 3xx={} 4xx={} 5xx={} (non-2xx {})",
            statuses.informational,
            statuses.success,
            statuses.redirection,
            statuses.client_error,
            statuses.server_error,
            statuses.non_2xx
        ),
    )?;

    let errors = &summary.errors;
    if errors.total > 0 {
        write_line(
            &mut output,
            &format!(
                "{} errors ({} connection-reset, {} write, {} protocol, {} timeout)",
                errors.total, errors.connection_reset, errors.write, errors.protocol, errors.timeout
            ),
        )?;
    }
    if summary.reconnects > 0 || summary.abandoned_connections > 0 {
        write_line(
            &mut output,
            &format!(
                "{} reconnects, {} abandoned connections",
                summary.reconnects, summary.abandoned_connections
            ),
        )?;
    }
    Ok(output)
}
