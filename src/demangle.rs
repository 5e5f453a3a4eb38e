// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Symbol demangling for the function names handed out by the provider.
//!
//! DWARF stores linkage names in their mangled form. We undo Rust and
//! Itanium-ABI C++ mangling; anything else is passed through untouched.

use std::borrow::Cow;

/// Clone suffixes appended by optimization passes, e.g. `foo.isra.0`.
const CLONE_SUFFIXES: &[&str] = &[".clone.", ".constprop.", ".llvm.", ".isra.", ".part."];

/// Strips disambiguation suffixes commonly appended to function clones.
///
/// Compilers create specialized copies of functions (constant propagation,
/// ISRA, outlined cold paths) and disambiguate them with dot-suffixes that
/// are not part of the mangled name proper.
fn strip_clone_suffixes(mut name: &str) -> &str {
    for suffix in CLONE_SUFFIXES {
        if let Some(pos) = name.rfind(suffix) {
            // Only a numeric disambiguator may follow, possibly with more
            // suffixes after it (`foo.constprop.3.cold`).
            let digits = name[pos + suffix.len()..].split('.').next().unwrap_or("");
            if !digits.is_empty() && digits.bytes().all(|x| x.is_ascii_digit()) {
                name = &name[..pos];
            }
        }
    }

    name.strip_suffix(".cold").unwrap_or(name)
}

/// Demangles the given symbol name.
///
/// Returns the input unchanged when it doesn't look like a mangled Rust or
/// C++ name, or when the demangler rejects it.
pub fn demangle(raw: &str) -> Cow<'_, str> {
    let name = strip_clone_suffixes(raw);

    // Rust first: legacy Rust mangling is a strict subset of Itanium C++
    // mangling, so the order matters.
    if let Ok(sym) = rustc_demangle::try_demangle(name) {
        // The alternate formatting using `#` suppresses the hash suffix.
        return Cow::Owned(format!("{sym:#}"));
    }

    if name.starts_with("_Z") || name.starts_with("___Z") {
        if let Ok(sym) = cpp_demangle::Symbol::new(name.as_bytes()) {
            if let Ok(out) = sym.demangle(&cpp_demangle::DemangleOptions::default()) {
                return Cow::Owned(out);
            }
        }
    }

    if name.len() == raw.len() {
        Cow::Borrowed(raw)
    } else {
        Cow::Owned(name.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_c() {
        assert_eq!(demangle("main"), "main");
        assert_eq!(demangle("do_work.isra.0"), "do_work");
        assert_eq!(demangle("do_work.constprop.3.cold"), "do_work");
        assert_eq!(demangle("not.a.clone"), "not.a.clone");
    }

    #[test]
    fn cxx() {
        assert_eq!(demangle("_ZN3foo3barEv"), "foo::bar()");
        assert_eq!(demangle("_Z3addii"), "add(int, int)");
    }

    #[test]
    fn rust() {
        let mangled = concat!(
            "_ZN71_$LT$rustc_demangle..legacy..Demangle$u20",
            "$as$u20$core..fmt..Display$GT$3fmt17h48ee277748f854a8E",
        );
        assert_eq!(
            demangle(mangled),
            "<rustc_demangle::legacy::Demangle as core::fmt::Display>::fmt",
        );
    }
}
