//! The client script appended to HTML pages.

/// Version of the notification protocol spoken by [`injected_script`].
///
/// Bumped on every breaking change so the server can tell when an open
/// tab still runs an old script.
pub const WS_PROTOCOL_VERSION: &str = "1";

/// Client script listening for reloads on `endpoint`.
///
/// The page connects to `<endpoint>?v=<version>` over `ws://` (or `wss://`
/// on https pages) and reloads when it receives `reload`. When the socket
/// closes it retries after a second; a retry that connects also reloads,
/// which covers server restarts.
///
/// Exposed for applications that prefer to place the script in their own
/// templates.
pub fn injected_script(endpoint: &str) -> String {
    let endpoint = js_string_contents(endpoint);
    format!(
        r#"
<script>
  (function () {{
    function connect(retrying) {{
      var scheme = location.protocol === "https:" ? "wss://" : "ws://";
      var socket = new WebSocket(scheme + location.host + "{endpoint}?v={WS_PROTOCOL_VERSION}");
      if (retrying) {{
        socket.onopen = function () {{ location.reload(); }};
      }}
      socket.onmessage = function (event) {{
        if (event.data === "reload") {{
          location.reload();
        }}
      }};
      socket.onclose = function () {{
        setTimeout(function () {{ connect(true); }}, 1000);
      }};
    }}
    connect(false);
  }})();
</script>"#
    )
}

/// Escape a value for use inside a double-quoted JS string in a `<script>`.
fn js_string_contents(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '<' => out.push_str("\\u003c"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}
