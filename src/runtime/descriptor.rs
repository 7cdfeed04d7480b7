use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;

/// Service names are DNS-1035 labels, so they cannot be longer than this.
const MAX_SERVICE_NAME_LEN: usize = 63;
const MEMORY_SEPARATOR: &str = "--";
const MEMORY_SUFFIX: &str = "mb";
/// Keyword selecting every runtime when filtering.
pub const ALL_RUNTIMES: &str = "all";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuntimeNameError {
    #[error("image name is empty")]
    EmptyImage,
    #[error("image name `{0}` contains the invalid character `{1}`")]
    InvalidCharacter(String, char),
    #[error("image name `{0}` must start with a letter and end with an alphanumeric character")]
    InvalidBoundary(String),
    #[error("image name `{0}` contains consecutive separators")]
    ConsecutiveSeparators(String),
    #[error("service name `{0}` exceeds {MAX_SERVICE_NAME_LEN} characters")]
    TooLong(String),
    #[error("`{0}` is not a service name produced by this system")]
    NotARuntimeService(String),
}

/// Identifies one deployable runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    pub image: String,
    pub memory_mb: u32,
    pub timeout: Duration,
}

impl RuntimeDescriptor {
    pub fn new(image: impl Into<String>, memory_mb: u32, timeout: Duration) -> Self {
        Self {
            image: image.into(),
            memory_mb,
            timeout,
        }
    }

    pub fn service_name(&self) -> Result<String, RuntimeNameError> {
        encode_service_name(&self.image, self.memory_mb)
    }
}

impl Display for RuntimeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}MB)", self.image, self.memory_mb)
    }
}

/// Selects deployed runtimes by image name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RuntimeFilter {
    #[default]
    All,
    Image(String),
}

impl RuntimeFilter {
    pub fn matches(&self, image: &str) -> bool {
        match self {
            RuntimeFilter::All => true,
            RuntimeFilter::Image(name) => name == image,
        }
    }
}

impl From<&str> for RuntimeFilter {
    fn from(value: &str) -> Self {
        if value == ALL_RUNTIMES {
            RuntimeFilter::All
        } else {
            RuntimeFilter::Image(value.to_string())
        }
    }
}

/// Separator characters allowed in image names and the length of the dash run encoding each one.
/// Runs of exactly two dashes are also used in front of the memory suffix, which is always the
/// last one in a name.
const SEPARATORS: [(char, usize); 5] = [('-', 1), ('/', 2), (':', 3), ('.', 4), ('_', 5)];

fn dash_run_len(c: char) -> Option<usize> {
    SEPARATORS
        .iter()
        .find_map(|(sep, len)| (*sep == c).then_some(*len))
}

fn separator_for_run(len: usize) -> Option<char> {
    SEPARATORS
        .iter()
        .find_map(|(sep, run)| (*run == len).then_some(*sep))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

/// Checks the image name can be encoded in a reversible way.
pub fn validate_image(image: &str) -> Result<(), RuntimeNameError> {
    let (Some(first), Some(last)) = (image.chars().next(), image.chars().last()) else {
        return Err(RuntimeNameError::EmptyImage);
    };
    if let Some(c) = image
        .chars()
        .find(|c| !is_name_char(*c) && dash_run_len(*c).is_none())
    {
        return Err(RuntimeNameError::InvalidCharacter(image.to_string(), c));
    }
    // Service names are DNS-1035 labels, which start with a letter.
    if !first.is_ascii_lowercase() || !is_name_char(last) {
        return Err(RuntimeNameError::InvalidBoundary(image.to_string()));
    }
    let mut previous_is_separator = false;
    for c in image.chars() {
        let is_separator = !is_name_char(c);
        if is_separator && previous_is_separator {
            return Err(RuntimeNameError::ConsecutiveSeparators(image.to_string()));
        }
        previous_is_separator = is_separator;
    }
    Ok(())
}

/// Encodes an image and a memory size into a service name, e.g. `user/img:1.0` with 256MB becomes
/// `user--img---1----0--256mb`.
pub fn encode_service_name(image: &str, memory_mb: u32) -> Result<String, RuntimeNameError> {
    validate_image(image)?;

    let mut name = String::with_capacity(image.len() * 2);
    for c in image.chars() {
        match dash_run_len(c) {
            Some(len) => name.extend(std::iter::repeat('-').take(len)),
            None => name.push(c),
        }
    }
    name.push_str(&format!("{MEMORY_SEPARATOR}{memory_mb}{MEMORY_SUFFIX}"));

    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(RuntimeNameError::TooLong(name));
    }
    Ok(name)
}

/// Decodes a service name produced by [encode_service_name] back into the image and memory.
pub fn decode_service_name(service_name: &str) -> Result<(String, u32), RuntimeNameError> {
    let not_runtime = || RuntimeNameError::NotARuntimeService(service_name.to_string());

    let (encoded_image, memory) = service_name
        .rsplit_once(MEMORY_SEPARATOR)
        .ok_or_else(not_runtime)?;
    let digits = memory.strip_suffix(MEMORY_SUFFIX).ok_or_else(not_runtime)?;
    let memory_mb: u32 = digits.parse().map_err(|_| not_runtime())?;
    if memory_mb.to_string() != digits {
        return Err(not_runtime());
    }

    let mut image = String::with_capacity(encoded_image.len());
    let mut run = 0;
    for c in encoded_image.chars() {
        if c == '-' {
            run += 1;
            continue;
        }
        if run > 0 {
            image.push(separator_for_run(run).ok_or_else(not_runtime)?);
            run = 0;
        }
        image.push(c);
    }
    if run > 0 {
        image.push(separator_for_run(run).ok_or_else(not_runtime)?);
    }

    validate_image(&image).map_err(|_| not_runtime())?;
    Ok((image, memory_mb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("python", 256, "python--256mb")]
    #[case("user/img", 512, "user--img--512mb")]
    #[case("user/img:1.0", 256, "user--img---1----0--256mb")]
    #[case("my-user/kn_runtime:v3", 2048, "my-user--kn-----runtime---v3--2048mb")]
    fn encodes_service_names(#[case] image: &str, #[case] memory: u32, #[case] expected: &str) {
        assert_eq!(encode_service_name(image, memory).unwrap(), expected);
    }

    #[rstest]
    #[case("python", 256)]
    #[case("user/img", 128)]
    #[case("docker.io/user/img:3.7", 256)]
    #[case("a-b/c-d:e-f", 1)]
    #[case("registry:5000/team/runtime_v2:1.2.3", 4096)]
    #[case("x", 0)]
    fn decoding_reverses_encoding(#[case] image: &str, #[case] memory: u32) {
        let name = encode_service_name(image, memory).unwrap();
        assert_eq!(
            decode_service_name(&name).unwrap(),
            (image.to_string(), memory)
        );
    }

    #[test]
    fn rejects_reserved_separator_in_images() {
        assert_matches!(
            encode_service_name("user--img", 256),
            Err(RuntimeNameError::ConsecutiveSeparators(_))
        );
        assert_matches!(
            encode_service_name("user/:img", 256),
            Err(RuntimeNameError::ConsecutiveSeparators(_))
        );
    }

    #[test]
    fn rejects_invalid_images() {
        assert_eq!(
            encode_service_name("", 256),
            Err(RuntimeNameError::EmptyImage)
        );
        assert_matches!(
            encode_service_name("User/img", 256),
            Err(RuntimeNameError::InvalidCharacter(_, 'U'))
        );
        assert_matches!(
            encode_service_name("img:", 256),
            Err(RuntimeNameError::InvalidBoundary(_))
        );
        assert_matches!(
            encode_service_name("3scale/apicast", 256),
            Err(RuntimeNameError::InvalidBoundary(_))
        );
        assert!(encode_service_name("apicast/3scale", 256).is_ok());
        assert_matches!(
            encode_service_name(&"a".repeat(60), 256),
            Err(RuntimeNameError::TooLong(_))
        );
    }

    #[rstest]
    #[case("nginx")]
    #[case("nginx--mb")]
    #[case("nginx--256")]
    #[case("nginx--0256mb")]
    #[case("nginx---256mb")]
    #[case("ngi------nx--256mb")]
    #[case("--256mb")]
    fn foreign_service_names_do_not_decode(#[case] name: &str) {
        assert_matches!(
            decode_service_name(name),
            Err(RuntimeNameError::NotARuntimeService(_))
        );
    }

    #[test]
    fn filter_matches_images() {
        assert_eq!(RuntimeFilter::from("all"), RuntimeFilter::All);
        assert!(RuntimeFilter::All.matches("anything"));
        let filter = RuntimeFilter::from("user/img");
        assert!(filter.matches("user/img"));
        assert!(!filter.matches("user/other"));
    }
}
