//! Swift symbol name mangling.
//!
//! Runtime symbols are looked up under mangled names: `$s` followed by the
//! mangled type, followed by a suffix selecting the kind of entity. Metadata
//! records end in `N`, protocol descriptors in `Mp`, and metadata accessor
//! functions in `Ma`. Only the subset of the mangling grammar needed for
//! nominal types, tuples, and bound generics is produced here.

use alloc::string::String;

// ============================================================================
// Type codes
// ============================================================================

/// The nominal-type kind character terminating a mangled nominal name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    Class = b'C',
    Enum = b'O',
    Struct = b'V',
}

impl TypeCode {
    pub fn as_char(self) -> char {
        self as u8 as char
    }
}

// ============================================================================
// Mangling
// ============================================================================

/// Mangles a module name. The standard library compresses to `s`; every
/// other module is length-prefixed.
pub fn mangle_module(module: &str) -> String {
    if module == "Swift" {
        String::from("s")
    } else {
        let mut out = String::new();
        push_identifier(&mut out, module);
        out
    }
}

/// Mangles a nominal type: module, length-prefixed name, kind character.
pub fn mangle_nominal(module: &str, name: &str, code: TypeCode) -> String {
    let mut out = mangle_module(module);
    push_identifier(&mut out, name);
    out.push(code.as_char());
    out
}

/// Mangles a tuple from already-mangled element types. The empty tuple is
/// `yt`; a one-element tuple is just the element itself.
pub fn mangle_tuple(elements: &[&str]) -> String {
    match elements {
        [] => String::from("yt"),
        [single] => String::from(*single),
        [first, rest @ ..] => {
            let mut out = String::from(*first);
            out.push('_');
            for element in rest {
                out.push_str(element);
            }
            out.push('t');
            out
        }
    }
}

/// Mangles a bound generic type from the mangled base and mangled arguments,
/// e.g. `SaySiG` for `[Int]`.
pub fn mangle_generic(base: &str, args: &[&str]) -> String {
    let mut out = String::from(base);
    out.push('y');
    for arg in args {
        out.push_str(arg);
    }
    out.push('G');
    out
}

/// The symbol of a type's metadata record.
pub fn metadata_symbol(mangled: &str) -> String {
    symbol(mangled, "N")
}

/// The symbol of a protocol's descriptor.
pub fn protocol_descriptor_symbol(mangled: &str) -> String {
    symbol(mangled, "Mp")
}

/// The symbol of a type's metadata accessor function.
pub fn metadata_accessor_symbol(mangled: &str) -> String {
    symbol(mangled, "Ma")
}

fn symbol(mangled: &str, suffix: &str) -> String {
    let mut out = String::with_capacity(2 + mangled.len() + suffix.len());
    out.push_str("$s");
    out.push_str(mangled);
    out.push_str(suffix);
    out
}

// ============================================================================
// Parsing
// ============================================================================

/// Splits a simple nominal mangling back into module, name, and type code.
/// Understands exactly the forms [`mangle_nominal`] produces; returns `None`
/// for anything else (tuples, generics, substitutions beyond `s`).
pub fn parse_nominal(mangled: &str) -> Option<(String, String, TypeCode)> {
    let (module, rest) = if let Some(rest) = mangled.strip_prefix('s') {
        (String::from("Swift"), rest)
    } else {
        let (module, rest) = take_identifier(mangled)?;
        (String::from(module), rest)
    };
    let (name, rest) = take_identifier(rest)?;
    let code = match rest.as_bytes() {
        [b'C'] => TypeCode::Class,
        [b'O'] => TypeCode::Enum,
        [b'V'] => TypeCode::Struct,
        _ => return None,
    };
    Some((module, String::from(name), code))
}

fn take_identifier(input: &str) -> Option<(&str, &str)> {
    let digits = input.len() - input.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let len: usize = input[..digits].parse().ok()?;
    let rest = &input[digits..];
    if len == 0 || rest.len() < len {
        return None;
    }
    Some((&rest[..len], &rest[len..]))
}

fn push_identifier(out: &mut String, identifier: &str) {
    // Length prefixes count bytes, and identifiers from source are ASCII.
    let mut len = identifier.len();
    let mut digits = [0u8; 20];
    let mut n = 0;
    loop {
        digits[n] = b'0' + (len % 10) as u8;
        len /= 10;
        n += 1;
        if len == 0 {
            break;
        }
    }
    while n > 0 {
        n -= 1;
        out.push(digits[n] as char);
    }
    out.push_str(identifier);
}
