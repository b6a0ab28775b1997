use url::Url;

/// Resolves a channel slug from a bare slug, a full channel URL, or a URL
/// missing its scheme.
///
/// `https://www.are.na/alice/my-channel` and `are.na/my-channel` both yield
/// `my-channel`. Returns `None` when no slug can be found.
pub fn extract_channel_slug(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.contains('/') && !trimmed.contains('.') {
        return Some(trimmed.to_string());
    }

    let candidate = if trimmed.starts_with("http") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    match Url::parse(&candidate) {
        Ok(url) => {
            let segments: Vec<&str> = url
                .path_segments()
                .map(|parts| parts.filter(|part| !part.is_empty()).collect())
                .unwrap_or_default();
            segments.last().map(|segment| (*segment).to_string())
        }
        Err(_) => trimmed
            .split('/')
            .filter(|token| !token.is_empty())
            .last()
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::extract_channel_slug;

    #[test]
    fn full_url_with_user_segment_returns_last_segment() {
        assert_eq!(
            extract_channel_slug("https://www.are.na/alice/my-channel").as_deref(),
            Some("my-channel")
        );
        assert_eq!(
            extract_channel_slug("https://www.are.na/alice/my-channel/").as_deref(),
            Some("my-channel")
        );
    }

    #[test]
    fn single_segment_and_bare_slug_resolve() {
        assert_eq!(
            extract_channel_slug("https://are.na/my-channel").as_deref(),
            Some("my-channel")
        );
        assert_eq!(extract_channel_slug("my-channel").as_deref(), Some("my-channel"));
        assert_eq!(
            extract_channel_slug("are.na/alice/field-notes").as_deref(),
            Some("field-notes")
        );
    }

    #[test]
    fn empty_and_pathless_inputs_fail() {
        assert_eq!(extract_channel_slug(""), None);
        assert_eq!(extract_channel_slug("   "), None);
        assert_eq!(extract_channel_slug("https://www.are.na"), None);
        assert_eq!(extract_channel_slug("https://www.are.na/"), None);
    }

    #[test]
    fn unparseable_url_falls_back_to_last_token() {
        assert_eq!(
            extract_channel_slug("bad host/alice/moodboard").as_deref(),
            Some("moodboard")
        );
        assert_eq!(
            extract_channel_slug("bad host/alice/").as_deref(),
            Some("alice")
        );
    }
}
