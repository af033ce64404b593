//! Thin structured writer over `quick-xml`.
//!
//! Text and attribute values are escaped by the writer; callers never
//! concatenate markup.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use rust_decimal::Decimal;

use einvoice_core::round2;

use crate::error::UblError;

pub(crate) type XmlResult<T> = Result<T, UblError>;

pub(crate) struct XmlBuilder {
    writer: Writer<Vec<u8>>,
}

impl XmlBuilder {
    pub(crate) fn new() -> XmlResult<Self> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| UblError::Xml(e.to_string()))?;
        Ok(Self { writer })
    }

    pub(crate) fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> XmlResult<&mut Self> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer
            .write_event(Event::Start(start))
            .map_err(|e| UblError::Xml(e.to_string()))?;
        Ok(self)
    }

    pub(crate) fn close(&mut self, name: &str) -> XmlResult<&mut Self> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|e| UblError::Xml(e.to_string()))?;
        Ok(self)
    }

    /// `<name attrs>text</name>`
    pub(crate) fn leaf(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> XmlResult<&mut Self> {
        self.open(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| UblError::Xml(e.to_string()))?;
        self.close(name)
    }

    pub(crate) fn text(&mut self, name: &str, text: &str) -> XmlResult<&mut Self> {
        self.leaf(name, &[], text)
    }

    /// Monetary amount with `currencyID`, rounded to two decimals.
    pub(crate) fn amount(&mut self, name: &str, value: Decimal, currency: &str) -> XmlResult<&mut Self> {
        self.leaf(name, &[("currencyID", currency)], &format_amount(value))
    }

    /// Unit price with `currencyID`. Keeps every significant decimal so
    /// price times quantity reproduces the line total.
    pub(crate) fn price(&mut self, name: &str, value: Decimal, currency: &str) -> XmlResult<&mut Self> {
        self.leaf(name, &[("currencyID", currency)], &format_price(value))
    }

    pub(crate) fn finish(self) -> XmlResult<String> {
        String::from_utf8(self.writer.into_inner()).map_err(|e| UblError::Xml(e.to_string()))
    }
}

pub(crate) fn format_amount(value: Decimal) -> String {
    let mut rounded = round2(value);
    rounded.rescale(2);
    rounded.to_string()
}

/// At least two decimals, more when the price carries them.
pub(crate) fn format_price(value: Decimal) -> String {
    let normalized = value.normalize();
    if normalized.scale() > 2 {
        normalized.to_string()
    } else {
        format_amount(value)
    }
}

/// Quantities and percents without trailing zeros.
pub(crate) fn format_plain(value: Decimal) -> String {
    value.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn text_is_escaped() {
        let mut xml = XmlBuilder::new().unwrap();
        xml.text("Name", "Tom & Jerry <Ltd>").unwrap();
        let out = xml.finish().unwrap();
        assert!(out.contains("<Name>Tom &amp; Jerry &lt;Ltd&gt;</Name>"));
    }

    #[test]
    fn amounts_have_two_decimals() {
        assert_eq!(format_amount(dec!(360)), "360.00");
        assert_eq!(format_amount(dec!(0.5)), "0.50");
        assert_eq!(format_plain(dec!(18.00)), "18");
        assert_eq!(format_plain(dec!(2.500)), "2.5");
    }

    #[test]
    fn amounts_round_half_away_from_zero() {
        assert_eq!(format_amount(dec!(0.335)), "0.34");
        assert_eq!(format_amount(dec!(12.3456)), "12.35");
        assert_eq!(format_amount(dec!(-1.005)), "-1.01");
    }

    #[test]
    fn prices_keep_extra_precision() {
        assert_eq!(format_price(dec!(0.335)), "0.335");
        assert_eq!(format_price(dec!(12.3456)), "12.3456");
        assert_eq!(format_price(dec!(250)), "250.00");
        assert_eq!(format_price(dec!(1.5000)), "1.50");
    }
}
