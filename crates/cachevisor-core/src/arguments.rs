/// Only setting keys starting with this character become command-line flags
pub const OPTION_PREFIX: char = '-';

/// Setting holding extra tokens appended verbatim after the flags
pub const CUSTOM_OPTIONS_KEY: &str = "custom options";

/// Builds the child's argument list from key/value settings.
///
/// Keys look like `-p` or `-p listening port`: everything after the first
/// space is a comment. Values are copied as-is, without quoting. Entries
/// with an empty value are skipped. The custom options value is split on
/// whitespace and appended last.
#[derive(Debug, Clone)]
pub struct ArgumentAssembler {
    custom_options_key: String,
}

impl Default for ArgumentAssembler {
    fn default() -> Self {
        Self::new(CUSTOM_OPTIONS_KEY)
    }
}

impl ArgumentAssembler {
    pub fn new(custom_options_key: impl Into<String>) -> Self {
        Self {
            custom_options_key: custom_options_key.into(),
        }
    }

    /// Assemble the argument list, following the iteration order of `settings`
    pub fn assemble<K, V, I>(&self, settings: I) -> Vec<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut args = Vec::new();
        let mut custom = Vec::new();

        for (key, value) in settings {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key == self.custom_options_key {
                custom.extend(value.split_whitespace().map(str::to_string));
                continue;
            }
            if !key.starts_with(OPTION_PREFIX) || value.is_empty() {
                continue;
            }
            let flag = key.split(' ').next().unwrap_or(key);
            args.push(flag.to_string());
            args.push(value.to_string());
        }

        args.extend(custom);
        args
    }
}
