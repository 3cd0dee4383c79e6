//! Client-side SQL composition.
//!
//! [`format_sql`] expands a format string into SQL text, rendering each
//! argument as a SQL literal or identifier:
//!
//! ```rust,ignore
//! let sql = format_sql(
//!     conn.format_options()?,
//!     "SELECT * FROM {} WHERE name = {} AND id > {}",
//!     &[&Identifier::new("users"), &"O'Brien", &42],
//! )?;
//! // SELECT * FROM `users` WHERE name = 'O\'Brien' AND id > 42
//! ```
//!
//! Replacement fields are `{}` (next argument) or `{N}` (argument `N`);
//! `{{` and `}}` produce literal braces. A format string must use either
//! automatic or manual indexing, not both.

use std::fmt::Display;

use mywire_core::{ClientErrorKind, Error, FieldView, Result, Value};

use crate::escape::{FormatOptions, QuotingContext, escape_bytes};

/// Accumulates formatted SQL.
///
/// The first error raised while formatting is kept and reported by
/// [`FormatContext::finish`]; later appends are still accepted so that
/// [`FormatSql`] implementations need not check for errors.
#[derive(Debug)]
pub struct FormatContext {
    output: String,
    opts: FormatOptions,
    error: Option<Error>,
}

impl FormatContext {
    pub fn new(opts: FormatOptions) -> Self {
        Self {
            output: String::new(),
            opts,
            error: None,
        }
    }

    pub fn options(&self) -> FormatOptions {
        self.opts
    }

    /// Append SQL text verbatim.
    pub fn append_raw(&mut self, sql: &str) -> &mut Self {
        self.output.push_str(sql);
        self
    }

    fn append_display(&mut self, v: impl Display) {
        self.output.push_str(&v.to_string());
    }

    fn append_quoted_display(&mut self, v: impl Display) {
        self.output.push('\'');
        self.append_display(v);
        self.output.push('\'');
    }

    /// Append a value rendered by its [`FormatSql`] implementation.
    pub fn append_value(&mut self, value: &(impl FormatSql + ?Sized)) -> &mut Self {
        value.format_sql(self);
        self
    }

    /// Record an error. Only the first one is kept.
    pub fn add_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Append `input` quoted and escaped for `ctx`.
    pub fn append_quoted(&mut self, input: &[u8], ctx: QuotingContext) {
        let quote = char::from(ctx.quote_char());
        let mut buf = Vec::with_capacity(input.len() + 2);
        match escape_bytes(input, self.opts, ctx, &mut buf) {
            Ok(()) => match String::from_utf8(buf) {
                Ok(escaped) => {
                    self.output.push(quote);
                    self.output.push_str(&escaped);
                    self.output.push(quote);
                }
                // Valid in the connection charset but not UTF-8
                Err(_) => self.add_error(Error::client(
                    ClientErrorKind::InvalidEncoding,
                    "value cannot be represented in UTF-8 SQL text",
                )),
            },
            Err(e) => self.add_error(e),
        }
    }

    /// The formatted SQL, or the first error recorded.
    pub fn finish(self) -> Result<String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.output),
        }
    }
}

/// Types that can be rendered into SQL text.
pub trait FormatSql {
    fn format_sql(&self, ctx: &mut FormatContext);
}

impl FormatSql for FieldView<'_> {
    fn format_sql(&self, ctx: &mut FormatContext) {
        match *self {
            FieldView::Null => {
                ctx.append_raw("NULL");
            }
            FieldView::Int(v) => ctx.append_display(v),
            FieldView::UInt(v) => ctx.append_display(v),
            FieldView::Float(v) => format_float(f64::from(v), ctx),
            FieldView::Double(v) => format_float(v, ctx),
            FieldView::Bytes(b) => ctx.append_quoted(b, QuotingContext::SingleQuote),
            FieldView::Date(d) => ctx.append_quoted_display(d),
            FieldView::DateTime(dt) => ctx.append_quoted_display(dt),
            FieldView::Time(t) => ctx.append_quoted_display(t),
        }
    }
}

fn format_float(v: f64, ctx: &mut FormatContext) {
    if v.is_finite() {
        ctx.append_raw(&scientific(v));
    } else {
        ctx.add_error(Error::client(
            ClientErrorKind::InvalidValue,
            format!("{v} has no SQL representation"),
        ));
    }
}

/// Shortest round-trip mantissa with a signed, two-digit minimum exponent:
/// `4.2e+00`, `1.5e-07`, `1e+300`.
fn scientific(v: f64) -> String {
    let s = format!("{v:e}");
    let Some((mantissa, exp)) = s.split_once('e') else {
        return s;
    };
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exp),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

impl FormatSql for Value {
    fn format_sql(&self, ctx: &mut FormatContext) {
        self.as_view().format_sql(ctx);
    }
}

impl FormatSql for str {
    fn format_sql(&self, ctx: &mut FormatContext) {
        ctx.append_quoted(self.as_bytes(), QuotingContext::SingleQuote);
    }
}

impl FormatSql for String {
    fn format_sql(&self, ctx: &mut FormatContext) {
        self.as_str().format_sql(ctx);
    }
}

impl FormatSql for &str {
    fn format_sql(&self, ctx: &mut FormatContext) {
        (**self).format_sql(ctx);
    }
}

impl FormatSql for bool {
    fn format_sql(&self, ctx: &mut FormatContext) {
        ctx.append_raw(if *self { "1" } else { "0" });
    }
}

macro_rules! impl_format_via_value {
    ($($t:ty),* $(,)?) => {
        $(impl FormatSql for $t {
            fn format_sql(&self, ctx: &mut FormatContext) {
                Value::from(*self).format_sql(ctx);
            }
        })*
    };
}

impl_format_via_value!(
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    mywire_core::Date,
    mywire_core::DateTime,
    mywire_core::Time,
);

impl<T: FormatSql> FormatSql for Option<T> {
    fn format_sql(&self, ctx: &mut FormatContext) {
        match self {
            Some(v) => v.format_sql(ctx),
            None => {
                ctx.append_raw("NULL");
            }
        }
    }
}

/// A possibly qualified SQL identifier, rendered in backticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    parts: Vec<String>,
}

impl Identifier {
    /// A single unqualified name, e.g. a column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            parts: vec![name.into()],
        }
    }

    /// A qualified name such as `db.table` or `db.table.column`.
    pub fn qualified<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }
}

impl FormatSql for Identifier {
    fn format_sql(&self, ctx: &mut FormatContext) {
        if self.parts.is_empty() {
            ctx.add_error(Error::client(
                ClientErrorKind::InvalidValue,
                "empty identifier",
            ));
            return;
        }
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                ctx.append_raw(".");
            }
            ctx.append_quoted(part.as_bytes(), QuotingContext::Backtick);
        }
    }
}

fn format_error(message: impl Into<String>) -> Error {
    Error::client(ClientErrorKind::InvalidFormatString, message)
}

/// Expand `format` into `ctx`.
pub fn format_sql_to(ctx: &mut FormatContext, format: &str, args: &[&dyn FormatSql]) {
    if let Err(e) = expand(ctx, format, args) {
        ctx.add_error(e);
    }
}

/// Expand `format` with `args` into SQL text.
pub fn format_sql(opts: FormatOptions, format: &str, args: &[&dyn FormatSql]) -> Result<String> {
    let mut ctx = FormatContext::new(opts);
    format_sql_to(&mut ctx, format, args);
    ctx.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indexing {
    Unknown,
    Automatic(usize),
    Manual,
}

fn expand(ctx: &mut FormatContext, format: &str, args: &[&dyn FormatSql]) -> Result<()> {
    let bytes = format.as_bytes();
    let charset = ctx.opts.charset;
    let mut indexing = Indexing::Unknown;
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let len = (charset.next_char)(&bytes[i..]);
        if len == 0 {
            return Err(Error::client(
                ClientErrorKind::InvalidEncoding,
                format!("format string is not valid {}", charset.name),
            ));
        }
        if len > 1 || (bytes[i] != b'{' && bytes[i] != b'}') {
            i += len;
            continue;
        }

        ctx.append_raw(&format[literal_start..i]);
        if bytes[i] == b'}' {
            if bytes.get(i + 1) != Some(&b'}') {
                return Err(format_error("unmatched '}' in format string"));
            }
            ctx.append_raw("}");
            i += 2;
            literal_start = i;
            continue;
        }
        if bytes.get(i + 1) == Some(&b'{') {
            ctx.append_raw("{");
            i += 2;
            literal_start = i;
            continue;
        }

        let close = format[i + 1..]
            .find('}')
            .map(|p| i + 1 + p)
            .ok_or_else(|| format_error("unterminated replacement field"))?;
        let spec = &format[i + 1..close];
        let index = if spec.is_empty() {
            match indexing {
                Indexing::Unknown => 0,
                Indexing::Automatic(next) => next,
                Indexing::Manual => {
                    return Err(format_error(
                        "cannot switch from manual to automatic indexing",
                    ));
                }
            }
        } else if spec.bytes().all(|b| b.is_ascii_digit()) {
            if matches!(indexing, Indexing::Automatic(_)) {
                return Err(format_error(
                    "cannot switch from automatic to manual indexing",
                ));
            }
            spec.parse::<usize>()
                .map_err(|_| format_error(format!("invalid argument index '{spec}'")))?
        } else {
            return Err(format_error(format!("invalid replacement field '{{{spec}}}'")));
        };
        indexing = if spec.is_empty() {
            Indexing::Automatic(index + 1)
        } else {
            Indexing::Manual
        };

        let arg = args.get(index).ok_or_else(|| {
            Error::client(
                ClientErrorKind::FormatArgNotFound,
                format!("format argument {index} not found ({} given)", args.len()),
            )
        })?;
        arg.format_sql(ctx);

        i = close + 1;
        literal_start = i;
    }

    ctx.append_raw(&format[literal_start..]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mywire_core::{Date, DateTime, ErrorCode, Time};

    fn fmt(format: &str, args: &[&dyn FormatSql]) -> Result<String> {
        format_sql(FormatOptions::default(), format, args)
    }

    fn client_kind(result: Result<String>) -> ClientErrorKind {
        match result.unwrap_err().code() {
            ErrorCode::Client(kind) => kind,
            other => panic!("expected client error, got {other:?}"),
        }
    }

    #[test]
    fn test_automatic_and_manual_indexing() {
        assert_eq!(
            fmt("SELECT {}, {}", &[&1, &"a"]).unwrap(),
            "SELECT 1, 'a'"
        );
        assert_eq!(
            fmt("SELECT {1}, {0}, {1}", &[&1, &2]).unwrap(),
            "SELECT 2, 1, 2"
        );
        assert_eq!(fmt("no fields", &[]).unwrap(), "no fields");
    }

    #[test]
    fn test_literal_braces() {
        assert_eq!(
            fmt("SELECT '{{}}', {}", &[&7u8]).unwrap(),
            "SELECT '{}', 7"
        );
    }

    #[test]
    fn test_value_rendering() {
        let date = Date::new(2021, 3, 14).unwrap();
        let dt = DateTime::new(2021, 3, 14, 1, 2, 3, 4).unwrap();
        let t = Time::new(true, 30, 0, 1, 0).unwrap();
        assert_eq!(
            fmt(
                "{} {} {} {} {} {} {}",
                &[&Value::Null, &-5i64, &u64::MAX, &1.5f64, &date, &dt, &t]
            )
            .unwrap(),
            "NULL -5 18446744073709551615 1.5e+00 '2021-03-14' \
             '2021-03-14 01:02:03.000004' '-30:00:01.000000'"
        );
        assert_eq!(fmt("{}", &[&Some(true)]).unwrap(), "1");
        assert_eq!(fmt("{}", &[&None::<i32>]).unwrap(), "NULL");
        assert_eq!(
            fmt("{}", &[&Value::Bytes(b"it's".to_vec())]).unwrap(),
            "'it\\'s'"
        );
    }

    #[test]
    fn test_float_exponent_is_signed() {
        assert_eq!(fmt("{}", &[&4.2f64]).unwrap(), "4.2e+00");
        assert_eq!(fmt("{}", &[&-1.5e-7f64]).unwrap(), "-1.5e-07");
        assert_eq!(fmt("{}", &[&1e300f64]).unwrap(), "1e+300");
        assert_eq!(fmt("{}", &[&0.25f32]).unwrap(), "2.5e-01");
        assert_eq!(fmt("{}", &[&0.0f64]).unwrap(), "0e+00");
    }

    #[test]
    fn test_no_backslash_escapes() {
        let opts = FormatOptions {
            backslash_escapes: false,
            ..FormatOptions::default()
        };
        assert_eq!(
            format_sql(opts, "{}", &[&"it's \\"]).unwrap(),
            "'it''s \\'"
        );
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            fmt("SELECT {} FROM {}", &[
                &Identifier::new("na`me"),
                &Identifier::qualified(["db", "users"])
            ])
            .unwrap(),
            "SELECT `na``me` FROM `db`.`users`"
        );
        assert_eq!(
            client_kind(fmt("{}", &[&Identifier::qualified(Vec::<String>::new())])),
            ClientErrorKind::InvalidValue
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            client_kind(fmt("{} {0}", &[&1])),
            ClientErrorKind::InvalidFormatString
        );
        assert_eq!(
            client_kind(fmt("{0} {}", &[&1])),
            ClientErrorKind::InvalidFormatString
        );
        assert_eq!(client_kind(fmt("{", &[&1])), ClientErrorKind::InvalidFormatString);
        assert_eq!(client_kind(fmt("}", &[])), ClientErrorKind::InvalidFormatString);
        assert_eq!(
            client_kind(fmt("{name}", &[&1])),
            ClientErrorKind::InvalidFormatString
        );
        assert_eq!(
            client_kind(fmt("{} {}", &[&1])),
            ClientErrorKind::FormatArgNotFound
        );
        assert_eq!(
            client_kind(fmt("{}", &[&f64::NAN])),
            ClientErrorKind::InvalidValue
        );
        assert_eq!(
            client_kind(fmt("{}", &[&Value::Bytes(vec![0xFF])])),
            ClientErrorKind::InvalidEncoding
        );
    }
}
