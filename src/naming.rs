//! File names in URLs: escaping, `{name}` templates and names derived from URLs.

use crate::error::{Cause, CallError, ErrorKind};
use std::path::Path;

const NAME_PLACEHOLDER: &str = "name";

/// Escapes a user supplied file name for use as a single URL path segment.
pub fn url_from_filename(filename: &str) -> String {
    urlencoding::encode(filename).into_owned()
}

/// Derives a local file name from the last path segment of `url`.
///
/// The query string and fragment are ignored and the segment is
/// percent-decoded. When the segment has no extension and `ext` is given,
/// `ext` is appended (a leading `.` is added if missing). Returns an empty
/// string when the URL ends with `/`.
pub fn filename_from_url(url: &str, ext: Option<&str>) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let mut name = urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string());

    if let Some(ext) = ext.filter(|e| !e.is_empty()) {
        if !name.is_empty() && Path::new(&name).extension().is_none() {
            if !ext.starts_with('.') {
                name.push('.');
            }
            name.push_str(ext);
        }
    }

    name
}

/// Substitutes `value` for the `{name}` placeholder in `template`.
///
/// `{{` and `}}` stand for literal braces. Any other placeholder, an
/// unbalanced brace, or a template without `{name}` is rejected with
/// [`ErrorKind::MalformedUrl`].
pub fn expand_name_template(template: &str, value: &str) -> Result<String, CallError> {
    let mut out = String::with_capacity(template.len() + value.len());
    let mut chars = template.chars().peekable();
    let mut substituted = false;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(malformed(template, "unclosed '{'")),
                    }
                }
                if field != NAME_PLACEHOLDER {
                    return Err(malformed(
                        template,
                        &format!("unsupported placeholder '{{{}}}'", field),
                    ));
                }
                out.push_str(value);
                substituted = true;
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(malformed(template, "single '}' encountered")),
            c => out.push(c),
        }
    }

    if !substituted {
        return Err(malformed(template, "no '{name}' placeholder"));
    }
    Ok(out)
}

fn malformed(template: &str, detail: &str) -> CallError {
    CallError::new(ErrorKind::MalformedUrl, "Incorrectly formatted url supplied.")
        .with_cause(Cause::Detail(format!("{}: {}", detail, template)))
}
