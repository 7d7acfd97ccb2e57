/// Build the relay URL for a target: `<relay_base>/<host>/<port>`.
///
/// `relay_base` is the relay endpoint including its path prefix, for example
/// `wss://relay.example.com/ws`.
pub fn target_url(relay_base: &str, host: &str, port: u16) -> String {
    format!("{}/{}/{}", relay_base.trim_end_matches('/'), host, port)
}
