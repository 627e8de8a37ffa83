//! Content normalization.
//!
//! Two zones "show the same thing" when their normalized content is equal.

/// Normalize displayed content: trim, collapse whitespace, lowercase.
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Human label derived from an image reference.
///
/// `https://cdn/img/Red_Apple.png?v=2` → `red apple`.
pub fn image_label(reference: &str) -> String {
    let without_query = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference);
    let file = without_query
        .rsplit('/')
        .next()
        .unwrap_or(without_query);
    let stem = match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    };
    normalize_content(&stem.replace(['_', '-'], " "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_content("  Big   Cat \n"), "big cat");
        assert_eq!(normalize_content("CAT"), normalize_content("cat"));
        assert_eq!(normalize_content(""), "");
    }

    #[test]
    fn test_image_label() {
        assert_eq!(image_label("https://cdn/img/Red_Apple.png?v=2"), "red apple");
        assert_eq!(image_label("dog.jpg"), "dog");
        assert_eq!(image_label("assets/sea-turtle"), "sea turtle");
        assert_eq!(image_label(".hidden"), ".hidden");
    }
}
