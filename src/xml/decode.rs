//! XML decoding.

use std::{io, str};
use std::borrow::Cow;
use bytes::Bytes;
use derive_more::{Display, From};
use quick_xml::events::{BytesStart, Event};


//------------ Reader --------------------------------------------------------

/// An XML reader.
///
/// This struct holds all state necessary for parsing an XML document.
pub struct Reader<R: io::BufRead> {
    reader: quick_xml::Reader<R>,
    buf: Vec<u8>,
    ns_buf: Vec<u8>,
}

impl<R: io::BufRead> Reader<R> {
    /// Creates a new reader from an underlying reader.
    pub fn new(reader: R) -> Self {
        let mut reader = quick_xml::Reader::from_reader(reader);
        reader.trim_text(true);
        Reader {
            reader,
            buf: Vec::new(),
            ns_buf: Vec::new(),
        }
    }

    /// Parses the start of the document.
    ///
    /// This is like `Content::take_opt_element` except that it requires an
    /// element and happily skips over XML and doctype declarations.
    pub fn start<F, E>(&mut self, op: F) -> Result<Content, E>
    where F: FnOnce(Element) -> Result<(), E>, E: From<Error> {
        loop {
            self.buf.clear();
            let (ns, event) = self.reader.read_namespaced_event(
                &mut self.buf, &mut self.ns_buf
            ).map_err(|err| E::from(Error::Xml(err)))?;
            match event {
                Event::Start(start) => {
                    op(Element::new(start, ns))?;
                    return Ok(Content { empty: false })
                }
                Event::Empty(start) => {
                    op(Element::new(start, ns))?;
                    return Ok(Content { empty: true })
                }
                Event::Comment(_) | Event::Decl(_) | Event::DocType(_) => { }
                _ => return Err(Error::Malformed.into())
            }
        }
    }

    /// Parses the end of the document.
    ///
    /// This checks that the next non-comment event is the end of file.
    pub fn end(&mut self) -> Result<(), Error> {
        loop {
            self.buf.clear();
            match self.reader.read_event(&mut self.buf)? {
                Event::Eof => return Ok(()),
                Event::Comment(_) => { }
                _ => return Err(Error::Malformed)
            }
        }
    }
}


//------------ Element -------------------------------------------------------

/// The start of an element.
pub struct Element<'b, 'n> {
    start: BytesStart<'b>,
    ns: Option<&'n [u8]>,
}

impl<'b, 'n> Element<'b, 'n> {
    fn new(start: BytesStart<'b>, ns: Option<&'n [u8]>) -> Self {
        Element { start, ns }
    }

    /// Returns the local name of the element.
    pub fn name(&self) -> &[u8] {
        self.start.local_name()
    }

    /// Returns the namespace of the element, if any.
    pub fn namespace(&self) -> Option<&[u8]> {
        self.ns
    }

    /// Processes the attributes of the element.
    ///
    /// Qualified attributes are not supported. The `xmlns` attribute is
    /// skipped.
    pub fn attributes<F, E>(&self, mut op: F) -> Result<(), E>
    where F: FnMut(&[u8], AttrValue) -> Result<(), E>, E: From<Error> {
        for attr in self.start.attributes() {
            let attr = attr.map_err(|_| E::from(Error::Malformed))?;
            if attr.key == b"xmlns" {
                continue
            }
            op(attr.key, AttrValue(attr))?;
        }
        Ok(())
    }
}


//------------ Content -------------------------------------------------------

/// The content of an element currently being parsed.
pub struct Content {
    empty: bool,
}

impl Content {
    /// Takes the next child element if there is one.
    ///
    /// Returns `None` when the enclosing element ends instead.
    pub fn take_opt_element<R, F, E>(
        &mut self,
        reader: &mut Reader<R>,
        op: F
    ) -> Result<Option<Content>, E>
    where R: io::BufRead, F: FnOnce(Element) -> Result<(), E>, E: From<Error> {
        if self.empty {
            return Ok(None)
        }

        loop {
            reader.buf.clear();
            let (ns, event) = reader.reader.read_namespaced_event(
                &mut reader.buf, &mut reader.ns_buf
            ).map_err(|err| E::from(Error::Xml(err)))?;
            match event {
                Event::Start(start) => {
                    op(Element::new(start, ns))?;
                    return Ok(Some(Content { empty: false }))
                }
                Event::Empty(start) => {
                    op(Element::new(start, ns))?;
                    return Ok(Some(Content { empty: true }))
                }
                Event::End(_) => {
                    self.empty = true;
                    return Ok(None)
                }
                Event::Comment(_) => { }
                _ => return Err(Error::Malformed.into())
            }
        }
    }

    /// Takes the text content of the element.
    pub fn take_text<R, F, T, E>(
        &mut self,
        reader: &mut Reader<R>,
        op: F
    ) -> Result<T, E>
    where R: io::BufRead, F: FnOnce(Text) -> Result<T, E>, E: From<Error> {
        if self.empty {
            return Err(Error::Malformed.into())
        }

        loop {
            reader.buf.clear();
            let event = reader.reader.read_event(
                &mut reader.buf
            ).map_err(|err| E::from(Error::Xml(err)))?;
            match event {
                Event::Text(text) => return op(Text(text)),
                Event::Comment(_) => { }
                _ => return Err(Error::Malformed.into())
            }
        }
    }

    /// Takes the text content of the element if there is any.
    ///
    /// Returns `None` when the element ends without text instead.
    pub fn take_opt_text<R, F, T, E>(
        &mut self,
        reader: &mut Reader<R>,
        op: F
    ) -> Result<Option<T>, E>
    where R: io::BufRead, F: FnOnce(Text) -> Result<T, E>, E: From<Error> {
        if self.empty {
            return Ok(None)
        }

        loop {
            reader.buf.clear();
            let event = reader.reader.read_event(
                &mut reader.buf
            ).map_err(|err| E::from(Error::Xml(err)))?;
            match event {
                Event::Text(text) => return op(Text(text)).map(Some),
                Event::End(_) => {
                    self.empty = true;
                    return Ok(None)
                }
                Event::Comment(_) => { }
                _ => return Err(Error::Malformed.into())
            }
        }
    }

    /// Takes the end of the element.
    pub fn take_end<R: io::BufRead>(
        &mut self,
        reader: &mut Reader<R>
    ) -> Result<(), Error> {
        if self.empty {
            return Ok(())
        }

        loop {
            reader.buf.clear();
            match reader.reader.read_event(&mut reader.buf)? {
                Event::End(_) => {
                    self.empty = true;
                    return Ok(())
                }
                Event::Comment(_) => { }
                _ => return Err(Error::Malformed)
            }
        }
    }
}


//------------ AttrValue -----------------------------------------------------

/// The value of an attribute.
#[derive(Clone)]
pub struct AttrValue<'a>(quick_xml::events::attributes::Attribute<'a>);

impl<'a> AttrValue<'a> {
    /// Converts the value into some type from its ASCII representation.
    pub fn ascii_into<T: str::FromStr>(self) -> Result<T, Error> {
        let s = self.0.unescaped_value()?;
        if !s.is_ascii() {
            return Err(Error::Malformed)
        }
        let s = unsafe { str::from_utf8_unchecked(s.as_ref()) };
        T::from_str(s).map_err(|_| Error::Malformed)
    }
}


//------------ Text ----------------------------------------------------------

/// The text content of an element.
pub struct Text<'a>(quick_xml::events::BytesText<'a>);

impl<'a> Text<'a> {
    /// Returns the unescaped text if it is ASCII.
    pub fn to_ascii(&self) -> Result<Cow<str>, Error> {
        let s = self.0.unescaped()?;
        if !s.is_ascii() {
            return Err(Error::Malformed)
        }
        match s {
            Cow::Borrowed(s) => {
                Ok(Cow::Borrowed(unsafe { str::from_utf8_unchecked(s) }))
            }
            Cow::Owned(s) => {
                Ok(Cow::Owned(
                    unsafe { String::from_utf8_unchecked(s) }
                ))
            }
        }
    }

    /// Decodes the text as base64 content, ignoring embedded whitespace.
    pub fn base64_decode(&self) -> Result<Bytes, Error> {
        let text = self.to_ascii()?;
        let stripped: String = text.chars().filter(
            |ch| !ch.is_ascii_whitespace()
        ).collect();
        base64::decode(&stripped)
            .map(Bytes::from)
            .map_err(|_| Error::Malformed)
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug, Display, From)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    Xml(quick_xml::Error),

    #[display(fmt = "malformed XML")]
    Malformed,
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(xml: &str) -> Reader<&[u8]> {
        Reader::new(xml.as_bytes())
    }

    #[test]
    fn reads_nested_elements() {
        let xml = "<a x=\"1\"><b/><b>dGV4dA==</b></a>";
        let mut reader = reader(xml);
        let mut seen = 0;
        let mut outer = reader.start::<_, Error>(|element| {
            assert_eq!(element.name(), b"a");
            element.attributes(|name, value| {
                assert_eq!(name, b"x");
                assert_eq!(value.ascii_into::<u32>()?, 1);
                Ok(())
            })
        }).unwrap();
        loop {
            let inner = outer.take_opt_element(&mut reader, |element| {
                assert_eq!(element.name(), b"b");
                Ok::<_, Error>(())
            }).unwrap();
            let mut inner = match inner {
                Some(inner) => inner,
                None => break,
            };
            seen += 1;
            if seen == 2 {
                let bytes = inner.take_text(&mut reader, |text| {
                    text.base64_decode()
                }).unwrap();
                assert_eq!(bytes.as_ref(), b"text");
            }
            inner.take_end(&mut reader).unwrap();
        }
        outer.take_end(&mut reader).unwrap();
        reader.end().unwrap();
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut reader = reader("<a/><a/>");
        let mut content = reader.start(|_| Ok::<_, Error>(())).unwrap();
        content.take_end(&mut reader).unwrap();
        assert!(reader.end().is_err());
    }
}
