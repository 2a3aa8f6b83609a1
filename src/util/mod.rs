use std::cell::Cell;

thread_local! {
    static FALLBACK_SEQ: Cell<u64> = const { Cell::new(0) };
}

/// Random per-tab identifier (hex, 128 bits).
pub(crate) fn random_tab_id() -> String {
    let mut buf = [0u8; 16];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => buf.iter().map(|b| format!("{b:02x}")).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "no randomness source; using sequential tab id");
            let n = FALLBACK_SEQ.with(|c| {
                c.set(c.get() + 1);
                c.get()
            });
            format!("tab-{n}")
        }
    }
}

/// Parses a server timestamp (RFC 3339 / ISO 8601) into epoch milliseconds.
///
/// Uses the browser's `Date.parse`; only meaningful on wasm.
pub(crate) fn parse_server_timestamp_ms(s: &str) -> Option<i64> {
    let ms = js_sys::Date::parse(s);
    if ms.is_nan() {
        None
    } else {
        Some(ms.round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_ids_are_distinct() {
        let a = random_tab_id();
        let b = random_tab_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
