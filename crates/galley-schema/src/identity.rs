use crate::types::InstanceName;

/// Derive the instance name for a suite/platform pair.
///
/// Every character outside `[A-Za-z0-9-]` becomes `-`, so the result is safe
/// to use as a file name under the project's state directory.
pub fn instance_name(suite: &str, platform: &str) -> InstanceName {
    let normalized: String = format!("{suite}-{platform}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    InstanceName::new(normalized)
}
