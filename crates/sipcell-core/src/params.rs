use smol_str::SmolStr;

/// Ordered parameter list shared by URIs, Via, and name-addr headers.
///
/// Order preservation matters: serializing a parsed value must reproduce the
/// original parameter order.
pub type Params = Vec<(SmolStr, Option<SmolStr>)>;

/// Finds a parameter by name, case-insensitively.
pub fn get_param<'a>(params: &'a Params, name: &str) -> Option<&'a Option<SmolStr>> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Returns the value of a parameter, treating valueless parameters as absent.
pub fn param_value<'a>(params: &'a Params, name: &str) -> Option<&'a SmolStr> {
    get_param(params, name).and_then(|v| v.as_ref())
}

/// Returns true when a parameter is present, with or without a value.
pub fn has_param(params: &Params, name: &str) -> bool {
    get_param(params, name).is_some()
}

/// Inserts or replaces a parameter, preserving its position when replacing.
pub fn set_param(params: &mut Params, name: &str, value: Option<SmolStr>) {
    match params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(slot) => slot.1 = value,
        None => params.push((SmolStr::new(name), value)),
    }
}

/// Removes a parameter if present, returning its value slot.
pub fn remove_param(params: &mut Params, name: &str) -> Option<Option<SmolStr>> {
    let idx = params.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))?;
    Some(params.remove(idx).1)
}

/// Parses a `;`-separated parameter tail into an ordered list.
///
/// Quoted parameter values keep their quotes so serialization is faithful.
pub fn parse_params(tail: &str) -> Params {
    let mut params = Params::new();
    for piece in split_params(tail) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match piece.split_once('=') {
            Some((name, value)) => params.push((
                SmolStr::new(name.trim()),
                Some(SmolStr::new(value.trim())),
            )),
            None => params.push((SmolStr::new(piece), None)),
        }
    }
    params
}

/// Serializes parameters back to their `;name=value` wire tail.
pub fn write_params(out: &mut String, params: &Params) {
    for (name, value) in params {
        out.push(';');
        out.push_str(name);
        if let Some(value) = value {
            out.push('=');
            out.push_str(value);
        }
    }
}

/// Splits on `;` while respecting double-quoted sections.
fn split_params(tail: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (idx, ch) in tail.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                pieces.push(&tail[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    pieces.push(&tail[start..]);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_preserves_order() {
        let params = parse_params("transport=tcp;lr;ttl=3");
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].0.as_str(), "transport");
        assert_eq!(params[1], (SmolStr::new("lr"), None));
        assert_eq!(param_value(&params, "TTL").unwrap().as_str(), "3");

        let mut out = String::new();
        write_params(&mut out, &params);
        assert_eq!(out, ";transport=tcp;lr;ttl=3");
    }

    #[test]
    fn quoted_values_keep_semicolons() {
        let params = parse_params("reason=\"a;b\";x");
        assert_eq!(params.len(), 2);
        assert_eq!(param_value(&params, "reason").unwrap().as_str(), "\"a;b\"");
    }

    #[test]
    fn set_replaces_in_place() {
        let mut params = parse_params("a=1;b=2");
        set_param(&mut params, "A", Some(SmolStr::new("9")));
        assert_eq!(params[0].1.as_deref(), Some("9"));
        set_param(&mut params, "c", None);
        assert_eq!(params.len(), 3);
    }
}
