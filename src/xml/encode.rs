//! XML encoding.

use std::{fmt, io};
use std::fmt::Write as _;

//------------ Writer --------------------------------------------------------

/// Wraps a writer for producing XML.
#[derive(Debug)]
pub struct Writer<W> {
    /// The wrapped writer.
    wrapped: W,

    /// A place to store an error for delayed error handling.
    ///
    /// This is necessary so we can use `Drop` for elements which doesn't
    /// allow us to return an error.
    error: Option<io::Error>,
}

impl<W: io::Write> Writer<W> {
    /// Creates a new XML writer by wrapping an IO writer.
    pub fn new(wrapped: W) -> Self {
        Writer { wrapped, error: None }
    }

    /// Starts an XML element.
    ///
    /// Returns an [`Element`] which can be used to add attributes and
    /// content. The element is finished when it is dropped.
    pub fn element<'s>(
        &'s mut self, tag: &'static str,
    ) -> Result<Element<'s, W>, io::Error> {
        Element::start(self, tag)
    }

    /// Concludes writing.
    pub fn done(mut self) -> Result<(), io::Error> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(())
        }
    }

    fn store_error(&mut self, error: io::Error) {
        self.error = Some(error)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
        if let Some(err) = self.error.take() {
            return Err(err)
        }
        self.wrapped.write_all(buf)
    }
}


//------------ Element -------------------------------------------------------

/// An XML element in the process of being written.
#[derive(Debug)]
pub struct Element<'a, W: io::Write> {
    writer: &'a mut Writer<W>,
    tag: &'static str,

    /// Is the element still empty?
    ///
    /// We have to keep this because of the different way empty elements
    /// are closed.
    empty: bool,
}

impl<'a, W: io::Write> Element<'a, W> {
    fn start(
        writer: &'a mut Writer<W>, tag: &'static str,
    ) -> Result<Self, io::Error> {
        writer.write_all(b"<")?;
        writer.write_all(tag.as_bytes())?;
        Ok(Element { writer, tag, empty: true })
    }

    /// Writes an attribute.
    pub fn attr(
        mut self, name: &str, value: &(impl Text + ?Sized),
    ) -> Result<Self, io::Error> {
        self.writer.write_all(b" ")?;
        self.writer.write_all(name.as_bytes())?;
        self.writer.write_all(b"=\"")?;
        value.write_escaped(TextEscape::Attr, self.writer)?;
        self.writer.write_all(b"\"")?;
        Ok(self)
    }

    /// Writes an optional attribute.
    pub fn attr_opt(
        self, name: &str, value: Option<&(impl Text + ?Sized)>,
    ) -> Result<Self, io::Error> {
        match value {
            None => Ok(self),
            Some(value) => self.attr(name, value)
        }
    }

    /// Writes the content of the element.
    ///
    /// The actual content is written by the closure passed in.
    pub fn content(
        mut self, op: impl FnOnce(&mut Content<W>) -> Result<(), io::Error>
    ) -> Result<Self, io::Error> {
        self.empty = false;
        self.writer.write_all(b">")?;
        op(&mut Content { writer: self.writer })?;
        Ok(self)
    }

    fn end(&mut self) -> Result<(), io::Error> {
        if self.empty {
            self.writer.write_all(b"/>")
        }
        else {
            self.writer.write_all(b"</")?;
            self.writer.write_all(self.tag.as_bytes())?;
            self.writer.write_all(b">")
        }
    }
}

impl<'a, W: io::Write> Drop for Element<'a, W> {
    fn drop(&mut self) {
        if let Err(err) = self.end() {
            self.writer.store_error(err)
        }
    }
}


//------------ Content -------------------------------------------------------

/// The content of an element.
///
/// This is passed to the closure for [`Element::content`] to use for
/// actually producing content.
#[derive(Debug)]
pub struct Content<'a, W> {
    writer: &'a mut Writer<W>,
}

impl<'a, W: io::Write> Content<'a, W> {
    /// Adds a child element with the given tag.
    pub fn element(
        &mut self, tag: &'static str,
    ) -> Result<Element<W>, io::Error> {
        Element::start(self.writer, tag)
    }

    /// Adds escaped text content.
    pub fn text(
        &mut self, text: &(impl Text + ?Sized)
    ) -> Result<(), io::Error> {
        text.write_escaped(TextEscape::Content, self.writer)
    }

    /// Adds raw, pre-escaped content.
    pub fn raw(
        &mut self, text: &(impl fmt::Display + ?Sized)
    ) -> Result<(), io::Error> {
        let mut target = DisplayWriter(self.writer);
        write!(target, "{}", text).map_err(|_| write_error())
    }
}


//------------ Text ----------------------------------------------------------

/// Text that can be written escaped.
///
/// This is implemented for everything that implements `fmt::Display`,
/// escaping the characters XML cares about on the way out.
pub trait Text {
    fn write_escaped<W: io::Write>(
        &self, mode: TextEscape, writer: &mut Writer<W>
    ) -> Result<(), io::Error>;
}

impl<T: fmt::Display + ?Sized> Text for T {
    fn write_escaped<W: io::Write>(
        &self, mode: TextEscape, writer: &mut Writer<W>
    ) -> Result<(), io::Error> {
        let mut target = EscapeWriter { writer, mode };
        write!(target, "{}", self).map_err(|_| write_error())
    }
}

fn write_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "XML write failed")
}


//------------ TextEscape ----------------------------------------------------

/// How text needs to be escaped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextEscape {
    /// Escape for use in attribute values.
    Attr,

    /// Escape for use in element content.
    Content,
}


//----------- Helpers for writing via fmt ------------------------------------

struct DisplayWriter<'a, W>(&'a mut Writer<W>);

impl<'a, W: io::Write> fmt::Write for DisplayWriter<'a, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_all(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

struct EscapeWriter<'a, W> {
    writer: &'a mut Writer<W>,
    mode: TextEscape,
}

impl<'a, W: io::Write> fmt::Write for EscapeWriter<'a, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            let escaped = match ch {
                '<' => "&lt;",
                '>' => "&gt;",
                '&' => "&amp;",
                '"' if self.mode == TextEscape::Attr => "&quot;",
                _ => {
                    let mut buf = [0u8; 4];
                    self.writer.write_all(
                        ch.encode_utf8(&mut buf).as_bytes()
                    ).map_err(|_| fmt::Error)?;
                    continue
                }
            };
            self.writer.write_all(
                escaped.as_bytes()
            ).map_err(|_| fmt::Error)?;
        }
        Ok(())
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_elements_and_attributes() {
        let mut out = Vec::new();
        let mut writer = Writer::new(&mut out);
        writer.element("msg").unwrap()
            .attr("version", "1").unwrap()
            .attr_opt("tag", None::<&str>).unwrap()
            .content(|content| {
                content.element("client").unwrap()
                    .attr("client_handle", "alice").unwrap();
                Ok(())
            }).unwrap();
        writer.done().unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<msg version=\"1\"><client client_handle=\"alice\"/></msg>"
        );
    }

    #[test]
    fn escapes_attribute_values() {
        let mut out = Vec::new();
        let mut writer = Writer::new(&mut out);
        writer.element("e").unwrap()
            .attr("a", "x<\"y\">&z").unwrap();
        writer.done().unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<e a=\"x&lt;&quot;y&quot;&gt;&amp;z\"/>"
        );
    }
}
