use tracing::warn;

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if !ch.is_control() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Where a degraded call happened and why.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarnContext<'a> {
    pub stage: &'a str,
    pub channel: &'a str,
    pub unit: &'a str,
    pub reason: &'a str,
}

/// Log one degraded step as a single-line key=value record.
pub fn emit(code: &str, ctx: WarnContext<'_>, err: &str) {
    warn!(
        code = %sanitize_value(code),
        stage = %sanitize_value(ctx.stage),
        channel = %sanitize_value(ctx.channel),
        unit = %sanitize_value(ctx.unit),
        reason = %sanitize_value(ctx.reason),
        err = %sanitize_value(err),
        "DIGEST_WARN"
    );
}
