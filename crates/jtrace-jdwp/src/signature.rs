//! Conversions between JNI type signatures and Java type names.

/// Convert a Java binary class name (e.g. `com.example.Foo`) into a JDWP
/// reference type signature (e.g. `Lcom/example/Foo;`).
///
/// If `class` already looks like a signature it is returned unchanged.
pub fn class_name_to_signature(class: &str) -> String {
    if class.starts_with('L') && class.ends_with(';') {
        return class.to_string();
    }
    let internal = class.replace('.', "/");
    format!("L{internal};")
}

/// Render a field/variable signature as a Java type name.
///
/// `I` → `int`, `Ljava/lang/String;` → `java.lang.String`,
/// `[[D` → `double[][]`. Nested classes keep their binary `$` separator.
pub fn signature_to_type_name(signature: &str) -> String {
    let mut sig = signature;
    let mut dims = 0usize;
    while let Some(rest) = sig.strip_prefix('[') {
        dims += 1;
        sig = rest;
    }

    let base = if let Some(class) = sig.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        class.replace('/', ".")
    } else {
        match sig.as_bytes().first().copied() {
            Some(b'B') => "byte".to_string(),
            Some(b'C') => "char".to_string(),
            Some(b'D') => "double".to_string(),
            Some(b'F') => "float".to_string(),
            Some(b'I') => "int".to_string(),
            Some(b'J') => "long".to_string(),
            Some(b'S') => "short".to_string(),
            Some(b'Z') => "boolean".to_string(),
            Some(b'V') => "void".to_string(),
            _ => "<unknown>".to_string(),
        }
    };

    let mut out = base;
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}

/// Split a method signature such as `(I[Ljava/lang/String;J)V` into its
/// parameter signatures. Malformed input yields the parameters parsed so far.
pub fn method_argument_signatures(signature: &str) -> Vec<String> {
    let Some(params) = signature
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map(|(params, _)| params)
    else {
        return Vec::new();
    };

    let bytes = params.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'[' => {
                i += 1;
                continue;
            }
            b'L' => match params[i..].find(';') {
                Some(end) => i += end + 1,
                None => break,
            },
            _ => i += 1,
        }
        out.push(params[start..i].to_string());
        start = i;
    }
    out
}

/// The return-type part of a method signature.
pub fn method_return_signature(signature: &str) -> &str {
    signature
        .split_once(')')
        .map(|(_, ret)| ret)
        .unwrap_or("V")
}
