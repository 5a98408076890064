use crate::config::{FileNamingConfig, SiteDescription};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Filename length limit of common filesystems, in bytes
pub const MAX_FILENAME_BYTES: usize = 255;

/// Removes invalid characters and collapses whitespace
///
/// # Examples
///
/// ```
/// use trawl::download::sanitize_title;
///
/// assert_eq!(sanitize_title("What?  Now: Part 1/2", &['?', ':', '/']), "What Now Part 12");
/// ```
pub fn sanitize_title(title: &str, invalid_chars: &[char]) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !invalid_chars.contains(c) && !c.is_control())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `s` to at most `max` bytes on a char boundary
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn unique_tag() -> String {
    let tag: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("_{}", tag)
}

/// Builds output filenames for one site
#[derive(Debug, Clone)]
pub struct FilenameBuilder {
    prefix: String,
    suffix: String,
    extension: String,
    invalid_chars: Vec<char>,
    max_chars: usize,
    unique: bool,
}

impl FilenameBuilder {
    pub fn new(naming: &FileNamingConfig, site: &SiteDescription) -> Self {
        Self {
            prefix: site.name_prefix.clone(),
            suffix: site.name_suffix.clone(),
            extension: naming.extension.clone(),
            invalid_chars: naming.invalid_chars.clone(),
            max_chars: naming.max_chars,
            unique: naming.unique_suffix || site.unique_name,
        }
    }

    /// A builder with no prefix, suffix or unique tag
    pub fn plain(naming: &FileNamingConfig) -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            extension: naming.extension.clone(),
            invalid_chars: naming.invalid_chars.clone(),
            max_chars: naming.max_chars,
            unique: false,
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Builds `prefix + title + suffix + [_xxxxxx] + extension`
    ///
    /// The title is cut to the character budget left by the fixed parts,
    /// then trimmed further until the UTF-8 name fits in
    /// [`MAX_FILENAME_BYTES`]. If the fixed parts alone are too long, the
    /// prefix and then the suffix are cut as well.
    pub fn build(&self, title: &str) -> String {
        let tag = if self.unique { unique_tag() } else { String::new() };
        let fixed = self.prefix.chars().count()
            + self.suffix.chars().count()
            + tag.chars().count()
            + self.extension.chars().count();

        let cap = self.max_chars.min(MAX_FILENAME_BYTES);
        let budget = if cap > fixed {
            cap - fixed
        } else {
            MAX_FILENAME_BYTES.saturating_sub(fixed).max(1)
        };

        let sanitized = sanitize_title(title, &self.invalid_chars);
        let mut title: String = sanitized.chars().take(budget).collect();
        title.truncate(title.trim_end().len());

        loop {
            let name = format!(
                "{}{}{}{}{}",
                self.prefix, title, self.suffix, tag, self.extension
            );
            if name.len() <= MAX_FILENAME_BYTES {
                return name;
            }
            if title.is_empty() {
                return self.shrink_fixed(&tag);
            }

            // At most four bytes per char, so this never overshoots by much
            let excess = name.len() - MAX_FILENAME_BYTES;
            for _ in 0..(excess / 4 + 1) {
                title.pop();
            }
            title.truncate(title.trim_end().len());
        }
    }

    /// Name without a title, with the prefix and suffix cut to fit
    fn shrink_fixed(&self, tag: &str) -> String {
        let tail = format!("{}{}", tag, self.extension);
        let mut room = MAX_FILENAME_BYTES.saturating_sub(tail.len());
        let prefix = truncate_bytes(&self.prefix, room);
        room -= prefix.len();
        let suffix = truncate_bytes(&self.suffix, room);

        let name = format!("{}{}{}", prefix, suffix, tail);
        tracing::warn!("Prefix and suffix cut to fit the filename limit: {}", name);
        truncate_bytes(&name, MAX_FILENAME_BYTES).to_string()
    }
}
