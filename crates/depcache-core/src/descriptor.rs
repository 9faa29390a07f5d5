//! Field/method descriptor and generic signature helpers

use crate::error::{CacheCorrupted, Result};

/// Split a field-type sequence into one descriptor per type.
fn split_types(list: &str) -> Result<Vec<String>> {
    let bytes = list.as_bytes();
    let mut types = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let start = pos;
        while pos < bytes.len() && bytes[pos] == b'[' {
            pos += 1;
        }
        match bytes.get(pos) {
            Some(b'L') => {
                let end = list[pos..]
                    .find(';')
                    .ok_or_else(|| invalid(list))?;
                pos += end + 1;
            }
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b'V') => pos += 1,
            _ => return Err(invalid(list)),
        }
        types.push(list[start..pos].to_string());
    }
    Ok(types)
}

fn invalid(descriptor: &str) -> CacheCorrupted {
    CacheCorrupted::invariant(format!("invalid descriptor `{descriptor}`"))
}

/// Parameter descriptors and return descriptor of a method descriptor.
pub fn split_method_descriptor(descriptor: &str) -> Result<(Vec<String>, String)> {
    let close = descriptor.find(')').ok_or_else(|| invalid(descriptor))?;
    if !descriptor.starts_with('(') {
        return Err(invalid(descriptor));
    }
    let params = split_types(&descriptor[1..close])?;
    let ret = descriptor[close + 1..].to_string();
    if split_types(&ret)?.len() != 1 {
        return Err(invalid(descriptor));
    }
    Ok((params, ret))
}

pub fn parameter_descriptors(descriptor: &str) -> Result<Vec<String>> {
    Ok(split_method_descriptor(descriptor)?.0)
}

pub fn return_descriptor(descriptor: &str) -> Result<String> {
    Ok(split_method_descriptor(descriptor)?.1)
}

/// `name(params)`: the overload identity of a method, without return type.
///
/// Covariant-return bridge pairs share this signature.
pub fn method_signature(name: &str, descriptor: &str) -> Result<String> {
    let close = descriptor.find(')').ok_or_else(|| invalid(descriptor))?;
    Ok(format!("{}{}", name, &descriptor[..=close]))
}

/// Source-level type name: `I` -> `int`, `[Ljava/lang/String;` -> `java.lang.String[]`.
pub fn to_source_type_name(descriptor: &str) -> Result<String> {
    let dims = descriptor.bytes().take_while(|b| *b == b'[').count();
    let element = &descriptor[dims..];
    let base = match element.as_bytes().first() {
        Some(b'B') => "byte".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'D') => "double".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'Z') => "boolean".to_string(),
        Some(b'V') => "void".to_string(),
        Some(b'L') => {
            let end = element.find(';').ok_or_else(|| invalid(descriptor))?;
            element[1..end].replace('/', ".")
        }
        _ => return Err(invalid(descriptor)),
    };
    Ok(format!("{}{}", base, "[]".repeat(dims)))
}

/// Dotted names of every class type mentioned in a field or method descriptor.
pub fn object_types(descriptor: &str) -> Result<Vec<String>> {
    let types = if descriptor.starts_with('(') {
        let (mut params, ret) = split_method_descriptor(descriptor)?;
        params.push(ret);
        params
    } else {
        split_types(descriptor)?
    };
    Ok(types
        .iter()
        .filter_map(|t| {
            let element = t.trim_start_matches('[');
            element
                .strip_prefix('L')
                .and_then(|s| s.strip_suffix(';'))
                .map(|s| s.replace('/', "."))
        })
        .collect())
}

/// Drop a leading `<...>` formal type parameter section, honouring nesting.
pub fn cut_formal_params(signature: &str) -> &str {
    if !signature.starts_with('<') {
        return signature;
    }
    let mut depth = 0usize;
    for (idx, ch) in signature.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return &signature[idx + 1..];
                }
            }
            _ => {}
        }
    }
    signature
}

/// The `(...)` parameter part of a generic method signature.
pub fn generic_params_part(signature: &str) -> &str {
    let rest = cut_formal_params(signature);
    match rest.find(')') {
        Some(close) => &rest[..=close],
        None => rest,
    }
}

/// The return-type part of a generic method signature, without the throws suffix.
pub fn generic_return_part(signature: &str) -> &str {
    let rest = cut_formal_params(signature);
    let after = match rest.find(')') {
        Some(close) => &rest[close + 1..],
        None => rest,
    };
    match after.find('^') {
        Some(caret) => &after[..caret],
        None => after,
    }
}

/// `Outer$1` style names produced for anonymous classes.
pub fn is_anonymous(qualified_name: &str) -> bool {
    match qualified_name.rsplit_once('$') {
        Some((_, tail)) => !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// `a.b.Outer$Inner` -> `a.b.Outer`.
pub fn top_level_name(qualified_name: &str) -> &str {
    match qualified_name.find('$') {
        Some(idx) => &qualified_name[..idx],
        None => qualified_name,
    }
}
