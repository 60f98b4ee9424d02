//! Public entry points.
//!
//! [`EncodeOptions`] controls formatting and limits, an [`Encoder`] pairs
//! them with a [`ProgramCache`], and the free functions encode through the
//! process-wide cache.

use std::io;

use tracing::trace;

use crate::cache::ProgramCache;
use crate::error::{EncodeError, InvariantError};
use crate::exec::Executor;
use crate::{PtrConst, Shaped};

/// Options for JSON encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Whether to pretty-print with indentation (default: false)
    pub pretty: bool,
    /// Indentation string for pretty-printing (default: "  ")
    pub indent: &'static str,
    /// Escape `<`, `>`, `&`, U+2028 and U+2029 in strings (default: true)
    pub escape_html: bool,
    /// Deepest allowed nesting of objects and arrays (default: 1000)
    pub max_depth: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            pretty: false,
            indent: "  ",
            escape_html: true,
            max_depth: 1000,
        }
    }
}

impl EncodeOptions {
    /// Create new default options (compact output).
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretty-printing with default indentation.
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    /// Set a custom indentation string (implies pretty-printing).
    pub fn indent(mut self, indent: &'static str) -> Self {
        self.indent = indent;
        self.pretty = true;
        self
    }

    /// Choose whether HTML-sensitive characters are escaped.
    pub fn escape_html(mut self, escape_html: bool) -> Self {
        self.escape_html = escape_html;
        self
    }

    /// Set the deepest allowed nesting.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Encodes values with the programs of a given cache.
#[derive(Debug, Clone, Copy)]
pub struct Encoder<'c> {
    cache: &'c ProgramCache,
    options: EncodeOptions,
}

impl<'c> Encoder<'c> {
    /// An encoder backed by `cache`, with default options.
    pub fn new(cache: &'c ProgramCache) -> Self {
        Self {
            cache,
            options: EncodeOptions::default(),
        }
    }

    /// Replaces the options.
    pub fn options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Encodes `value` into a byte vector.
    pub fn to_vec<T: Shaped>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        let root = self
            .cache
            .get_or_compile(T::SHAPE)
            .map_err(|source| EncodeError::Compile {
                root: T::SHAPE.type_name(),
                source,
            })?;
        trace!("encoding {} with {}", T::SHAPE.type_name(), root.program);
        let executor = Executor::new(&root.table, &self.options);
        // SAFETY: `root` was compiled for `T`, and `value` is borrowed for the
        // whole call.
        unsafe { executor.run(&root, PtrConst::new(value)) }
    }

    /// Encodes `value` into a string.
    pub fn to_string<T: Shaped>(&self, value: &T) -> Result<String, EncodeError> {
        let bytes = self.to_vec(value)?;
        String::from_utf8(bytes).map_err(|_| {
            InvariantError::new(T::SHAPE.type_name(), "encoder produced invalid UTF-8").into()
        })
    }

    /// Encodes `value` and hands the whole document to `writer` in one write.
    ///
    /// Nothing reaches `writer` if encoding fails.
    pub fn to_writer<T: Shaped, W: io::Write>(
        &self,
        value: &T,
        mut writer: W,
    ) -> Result<(), EncodeError> {
        let bytes = self.to_vec(value)?;
        writer.write_all(&bytes)?;
        Ok(())
    }
}

/// Encodes a value to JSON bytes.
pub fn to_vec<T: Shaped>(value: &T) -> Result<Vec<u8>, EncodeError> {
    to_vec_with_options(value, EncodeOptions::default())
}

/// Encodes a value to JSON bytes with custom options.
pub fn to_vec_with_options<T: Shaped>(
    value: &T,
    options: EncodeOptions,
) -> Result<Vec<u8>, EncodeError> {
    Encoder::new(ProgramCache::global())
        .options(options)
        .to_vec(value)
}

/// Encodes a value to a JSON string.
pub fn to_string<T: Shaped>(value: &T) -> Result<String, EncodeError> {
    to_string_with_options(value, EncodeOptions::default())
}

/// Encodes a value to a pretty-printed JSON string.
pub fn to_string_pretty<T: Shaped>(value: &T) -> Result<String, EncodeError> {
    to_string_with_options(value, EncodeOptions::default().pretty())
}

/// Encodes a value to a JSON string with custom options.
///
/// # Example
///
/// ```
/// use facet_opcode::{EncodeOptions, shaped_struct, to_string_with_options};
///
/// shaped_struct! {
///     struct Person {
///         #[json("name")]
///         name: String,
///         #[json("age")]
///         age: u32,
///     }
/// }
///
/// let person = Person { name: "Alice".to_string(), age: 30 };
/// let json = to_string_with_options(&person, EncodeOptions::default().indent("    ")).unwrap();
/// assert_eq!(json, "{\n    \"name\": \"Alice\",\n    \"age\": 30\n}");
/// ```
pub fn to_string_with_options<T: Shaped>(
    value: &T,
    options: EncodeOptions,
) -> Result<String, EncodeError> {
    Encoder::new(ProgramCache::global())
        .options(options)
        .to_string(value)
}

/// Encodes a value as JSON into a writer.
pub fn to_writer<T: Shaped, W: io::Write>(value: &T, writer: W) -> Result<(), EncodeError> {
    to_writer_with_options(value, writer, EncodeOptions::default())
}

/// Encodes a value as JSON into a writer with custom options.
pub fn to_writer_with_options<T: Shaped, W: io::Write>(
    value: &T,
    writer: W,
    options: EncodeOptions,
) -> Result<(), EncodeError> {
    Encoder::new(ProgramCache::global())
        .options(options)
        .to_writer(value, writer)
}
