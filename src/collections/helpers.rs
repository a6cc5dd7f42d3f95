use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const MAX_ERROR_CHARS: usize = 1000;

static ERROR_CODE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Error code:\s*\d+\s*-\s*").expect("error code prefix pattern is valid")
});

/// Reduce a provider failure to a concise message for clients.
///
/// Strips an `Error code: N - ` prefix, prefers `error.message` when the rest is a JSON object,
/// and caps the result at 1000 characters.
pub fn extract_error_message(raw: &str) -> String {
    let body = ERROR_CODE_PREFIX.replace(raw.trim(), "");
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|payload| {
            payload
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| body.into_owned());

    message.trim().chars().take(MAX_ERROR_CHARS).collect()
}

/// Split `items` into consecutive slices of at most `batch_size` entries.
pub fn batches<T>(items: &[T], batch_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(batch_size.max(1))
}
