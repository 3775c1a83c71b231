/// Makes an identity (package name, ARN, version) safe to use as a single path
/// component. Bytes outside `[A-Za-z0-9._-]` are percent-encoded, as is a
/// leading dot, so `.`/`..` and separators never reach the filesystem.
pub fn escape_path_component(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for (index, byte) in value.bytes().enumerate() {
        let safe = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && index > 0);
        if safe {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    if escaped.is_empty() {
        escaped.push('%');
    }
    escaped
}
