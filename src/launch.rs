use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    pub open: Option<PathBuf>,
    pub settings: Option<PathBuf>,
}

/// Parses `[--settings <path>] [--open] <file>` or a `tagtree://open?path=...` link.
pub fn parse_launch_request_from_args(args: &[String]) -> Result<LaunchRequest, String> {
    let mut request = LaunchRequest::default();
    let mut args = args.iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                let path = args
                    .next()
                    .ok_or_else(|| "Missing settings file path after --settings.".to_string())?;
                request.settings = Some(PathBuf::from(path));
            }
            "--open" => {
                let path = args
                    .next()
                    .ok_or_else(|| "Missing file path after --open.".to_string())?;
                set_open_path(&mut request, PathBuf::from(path))?;
            }
            value if is_tagtree_uri(value) => {
                if let Some(path) = parse_tagtree_uri(value)? {
                    set_open_path(&mut request, path)?;
                }
            }
            value if value.starts_with("--") => {
                return Err(format!("Unknown option {value}."));
            }
            value => set_open_path(&mut request, PathBuf::from(value))?,
        }
    }

    Ok(request)
}

fn set_open_path(request: &mut LaunchRequest, path: PathBuf) -> Result<(), String> {
    if let Some(existing) = &request.open {
        return Err(format!(
            "Only one file can be opened at a time (got {} and {}).",
            existing.display(),
            path.display()
        ));
    }
    request.open = Some(path);
    Ok(())
}

/// File named by a `tagtree://open/<path>` or `tagtree://open?path=<path>` link.
pub fn parse_tagtree_uri(uri: &str) -> Result<Option<PathBuf>, String> {
    let rest = strip_tagtree_scheme(uri)
        .ok_or_else(|| "URL must start with tagtree://".to_string())?;

    let (location, query) = split_location_and_query(rest);
    let mut path = parse_location_path(location)?;

    if let Some(query_string) = query {
        for pair in query_string.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if !key.eq_ignore_ascii_case("path") && !key.eq_ignore_ascii_case("file") {
                continue;
            }
            let decoded = percent_decode(value)?;
            if decoded.trim().is_empty() {
                continue;
            }
            if path.is_some() {
                return Err("URL names more than one file.".to_string());
            }
            path = Some(decoded);
        }
    }

    Ok(path.map(PathBuf::from))
}

fn is_tagtree_uri(value: &str) -> bool {
    strip_tagtree_scheme(value).is_some()
}

fn strip_tagtree_scheme(uri: &str) -> Option<&str> {
    let prefix = "tagtree://";
    uri.get(..prefix.len())
        .filter(|scheme| scheme.eq_ignore_ascii_case(prefix))
        .map(|_| &uri[prefix.len()..])
}

fn split_location_and_query(value: &str) -> (&str, Option<&str>) {
    match value.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (value, None),
    }
}

fn parse_location_path(location: &str) -> Result<Option<String>, String> {
    let location = location.trim().trim_end_matches('/');
    if location.is_empty() || location.eq_ignore_ascii_case("open") {
        return Ok(None);
    }

    let candidate = match location.get(..5) {
        Some(verb) if verb.eq_ignore_ascii_case("open/") => &location[5..],
        _ => location,
    };
    let decoded = percent_decode(candidate)?;
    Ok((!decoded.trim().is_empty()).then_some(decoded))
}

fn percent_decode(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => {
                decoded.push(b' ');
                index += 1;
            }
            b'%' => {
                let digits = bytes
                    .get(index + 1..index + 3)
                    .and_then(|pair| Some((decode_hex_digit(pair[0])?, decode_hex_digit(pair[1])?)))
                    .ok_or_else(|| "Invalid percent-encoding in URL.".to_string())?;
                decoded.push((digits.0 << 4) | digits.1);
                index += 3;
            }
            byte => {
                decoded.push(byte);
                index += 1;
            }
        }
    }

    String::from_utf8(decoded).map_err(|_| "URL contains invalid UTF-8 after decoding.".to_string())
}

fn decode_hex_digit(value: u8) -> Option<u8> {
    match value {
        b'0'..=b'9' => Some(value - b'0'),
        b'a'..=b'f' => Some(value - b'a' + 10),
        b'A'..=b'F' => Some(value - b'A' + 10),
        _ => None,
    }
}
