//! Domain-specific assertion macros for logpond harnesses.
//!
//! These wrap `pretty_assertions` and add failure messages that say which
//! event and which field broke the expectation.

// ---------------------------------------------------------------------------
// Field assertions
// ---------------------------------------------------------------------------

/// Assert that an [`Event`](logpond::core::Event) has a field with the
/// expected value.
///
/// ```rust
/// assert_has_field!(event, "user", "alice");
/// ```
#[macro_export]
macro_rules! assert_has_field {
    ($event:expr, $name:expr, $value:expr) => {{
        let event: &logpond::core::Event = &$event;
        let name: &str = $name;
        let expected: &str = $value;
        match event.fields.get(name) {
            Some(actual) if actual == expected => {}
            Some(actual) => panic!(
                "assert_has_field! failed:\n  event.fields[{:?}]\n  expected: {:?}\n  actual:   {:?}\n  raw: {:?}",
                name, expected, actual, event.raw
            ),
            None => panic!(
                "assert_has_field! failed: field {:?} not found.\n  Available fields: {:?}\n  raw: {:?}",
                name,
                event.fields.keys().collect::<Vec<_>>(),
                event.raw
            ),
        }
    }};
}

/// Assert that an event has no field called `$name`.
#[macro_export]
macro_rules! assert_no_field {
    ($event:expr, $name:expr) => {{
        let event: &logpond::core::Event = &$event;
        let name: &str = $name;
        if let Some(value) = event.fields.get(name) {
            panic!(
                "assert_no_field! failed: field {:?} = {:?}\n  raw: {:?}",
                name, value, event.raw
            );
        }
    }};
}

// ---------------------------------------------------------------------------
// Stored event assertions
// ---------------------------------------------------------------------------

/// Assert that stored events carry strictly increasing ids.
#[macro_export]
macro_rules! assert_ids_increasing {
    ($stored:expr) => {{
        let stored: &[logpond::core::StoredEvent] = &$stored;
        for pair in stored.windows(2) {
            if pair[1].id <= pair[0].id {
                panic!(
                    "assert_ids_increasing! failed: id {} follows id {}\n  raws: {:?} then {:?}",
                    pair[1].id, pair[0].id, pair[0].event.raw, pair[1].event.raw
                );
            }
        }
    }};
}

/// Assert the raw texts of stored events, in order.
#[macro_export]
macro_rules! assert_raws {
    ($stored:expr, $expected:expr) => {{
        let stored: &[logpond::core::StoredEvent] = &$stored;
        let actual: Vec<&str> = stored.iter().map(|s| s.event.raw.as_str()).collect();
        let expected: &[&str] = &$expected;
        pretty_assertions::assert_eq!(actual, expected.to_vec(), "stored raw events differ");
    }};
}
