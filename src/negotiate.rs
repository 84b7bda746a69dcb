//! `type=auto` output negotiation against the `Accept` header.

use crate::error::AppError;
use crate::transform::OutputFormat;

/// Formats `type=auto` may resolve to
const AUTO_CANDIDATES: [OutputFormat; 3] = [OutputFormat::Webp, OutputFormat::Png, OutputFormat::Jpeg];

/// Outcome of resolving the requested output type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// `None` keeps the input format
    pub format: Option<OutputFormat>,
    /// The response depends on `Accept` and must say so
    pub vary_accept: bool,
}

/// First media range of `accept`, in header order, naming webp, png or jpeg.
pub fn determine_accept_format(accept: &str) -> Option<OutputFormat> {
    accept
        .split(',')
        .filter_map(|range| range.split(';').next())
        .map(|media| media.trim().to_ascii_lowercase())
        .find_map(|media| {
            AUTO_CANDIDATES
                .into_iter()
                .find(|format| format.mime() == media)
        })
}

/// Resolve the `type` parameter.
///
/// Unknown explicit types fail before any transform work is done.
pub fn negotiate(type_name: Option<&str>, accept: Option<&str>) -> Result<Negotiated, AppError> {
    match type_name.map(str::trim).filter(|t| !t.is_empty()) {
        None => Ok(Negotiated::default()),
        Some(t) if t.eq_ignore_ascii_case("auto") => Ok(Negotiated {
            format: accept.and_then(determine_accept_format),
            vary_accept: true,
        }),
        Some(t) => OutputFormat::from_name(t)
            .map(|format| Negotiated {
                format: Some(format),
                vary_accept: false,
            })
            .ok_or(AppError::OutputFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_follows_header_order() {
        assert_eq!(
            determine_accept_format("image/jpeg, image/png, image/webp"),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(
            determine_accept_format("image/jpeg;q=0.9,image/png"),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(
            determine_accept_format("text/html, image/avif, IMAGE/PNG, image/webp"),
            Some(OutputFormat::Png)
        );
        assert_eq!(determine_accept_format("image/jpeg"), Some(OutputFormat::Jpeg));
        assert_eq!(determine_accept_format("text/html, */*"), None);
        assert_eq!(determine_accept_format(""), None);
    }

    #[test]
    fn test_auto_varies_on_accept() {
        let n = negotiate(Some("auto"), Some("image/webp,*/*")).unwrap();
        assert_eq!(n.format, Some(OutputFormat::Webp));
        assert!(n.vary_accept);

        let n = negotiate(Some("auto"), None).unwrap();
        assert_eq!(n.format, None);
        assert!(n.vary_accept);
    }

    #[test]
    fn test_explicit_type() {
        let n = negotiate(Some("png"), Some("image/webp")).unwrap();
        assert_eq!(n.format, Some(OutputFormat::Png));
        assert!(!n.vary_accept);

        assert_eq!(negotiate(None, Some("image/webp")).unwrap(), Negotiated::default());
        assert!(matches!(negotiate(Some("heic"), None), Err(AppError::OutputFormat)));
    }
}
