//! Identifier qualification across namespaces.
//!
//! An identifier is *qualified* when it carries its owning namespace as a
//! dotted prefix (`l10n_be.tax_21`). Both operations are pure.

/// Separator between a namespace and a local identifier.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Prefix `id` with `namespace` unless it is already qualified.
pub fn qualify(id: &str, namespace: &str) -> String {
    if id.contains(NAMESPACE_SEPARATOR) {
        id.to_owned()
    } else {
        format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, id)
    }
}

/// Strip any namespace prefix, keeping what follows the last separator.
pub fn unqualify(id: &str) -> &str {
    match id.rfind(NAMESPACE_SEPARATOR) {
        Some(pos) => &id[pos + 1..],
        None => id,
    }
}
