//! Outbound invoice document (the content packaged into UBL-TR).

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use einvoice_core::{DomainError, DomainResult, round2, sum_rounded};

/// Scenario under which the invoice is exchanged.
///
/// Only commercial invoices take part in the accept/reject answer protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InvoiceProfile {
    /// `TEMELFATURA`
    Basic,
    /// `TICARIFATURA`
    Commercial,
    /// Any other profile reported by the remote side (export, e-archive, ...).
    Other(String),
}

impl InvoiceProfile {
    pub fn code(&self) -> &str {
        match self {
            InvoiceProfile::Basic => "TEMELFATURA",
            InvoiceProfile::Commercial => "TICARIFATURA",
            InvoiceProfile::Other(code) => code,
        }
    }

    pub fn is_answerable(&self) -> bool {
        matches!(self, InvoiceProfile::Commercial)
    }
}

impl From<String> for InvoiceProfile {
    fn from(value: String) -> Self {
        match value.trim().to_uppercase().as_str() {
            "TEMELFATURA" => InvoiceProfile::Basic,
            "TICARIFATURA" => InvoiceProfile::Commercial,
            _ => InvoiceProfile::Other(value.trim().to_string()),
        }
    }
}

impl From<InvoiceProfile> for String {
    fn from(value: InvoiceProfile) -> Self {
        value.code().to_string()
    }
}

/// `cbc:InvoiceTypeCode`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InvoiceTypeCode {
    Sales,
    Return,
    Withholding,
    Exemption,
    Other(String),
}

impl InvoiceTypeCode {
    pub fn code(&self) -> &str {
        match self {
            InvoiceTypeCode::Sales => "SATIS",
            InvoiceTypeCode::Return => "IADE",
            InvoiceTypeCode::Withholding => "TEVKIFAT",
            InvoiceTypeCode::Exemption => "ISTISNA",
            InvoiceTypeCode::Other(code) => code,
        }
    }
}

impl From<String> for InvoiceTypeCode {
    fn from(value: String) -> Self {
        match value.trim().to_uppercase().as_str() {
            "SATIS" => InvoiceTypeCode::Sales,
            "IADE" => InvoiceTypeCode::Return,
            "TEVKIFAT" => InvoiceTypeCode::Withholding,
            "ISTISNA" => InvoiceTypeCode::Exemption,
            _ => InvoiceTypeCode::Other(value.trim().to_string()),
        }
    }
}

impl From<InvoiceTypeCode> for String {
    fn from(value: InvoiceTypeCode) -> Self {
        value.code().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    /// District (`cbc:CitySubdivisionName`).
    pub district: String,
    pub city: String,
    pub postal_zone: Option<String>,
    pub country: String,
}

/// Supplier or customer identity block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// VKN (10 digits, companies) or TCKN (11 digits, persons).
    pub identifier: String,
    pub name: String,
    pub tax_office: Option<String>,
    pub address: Address,
}

impl Party {
    /// Identification scheme derived from the identifier length.
    pub fn scheme(&self) -> &'static str {
        if self.identifier.trim().len() == 11 { "TCKN" } else { "VKN" }
    }

    fn validate(&self, role: &str) -> DomainResult<()> {
        let id = self.identifier.trim();
        if !(id.len() == 10 || id.len() == 11) || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "{role} identifier must be a 10-digit VKN or 11-digit TCKN"
            )));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation(format!("{role} name is required")));
        }
        Ok(())
    }
}

/// One invoiced item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: Decimal,
    /// UN/ECE rec 20 unit code (`C62` = piece).
    pub unit_code: String,
    pub unit_price: Decimal,
    /// Percent, e.g. `18` for 18%.
    pub tax_rate: Decimal,
}

impl LineItem {
    /// `quantity × unit_price`, rounded to 2 decimals.
    ///
    /// Saturates instead of overflowing; [`InvoiceDocument::validate`]
    /// rejects lines where that would happen.
    pub fn line_total(&self) -> Decimal {
        round2(self.quantity.saturating_mul(self.unit_price))
    }

    /// `line_total × tax_rate / 100`, rounded to 2 decimals.
    pub fn tax_amount(&self) -> Decimal {
        round2(self.line_total().saturating_mul(self.tax_rate) / Decimal::ONE_HUNDRED)
    }

    /// Line total and tax, or `None` when either overflows.
    fn checked_amounts(&self) -> Option<(Decimal, Decimal)> {
        let total = round2(self.quantity.checked_mul(self.unit_price)?);
        let tax = round2(total.checked_mul(self.tax_rate)?.checked_div(Decimal::ONE_HUNDRED)?);
        Some((total, tax))
    }

    fn validate(&self, line_no: usize) -> DomainResult<()> {
        if self.quantity.is_sign_negative() && !self.quantity.is_zero() {
            return Err(DomainError::validation(format!(
                "line {line_no}: quantity must not be negative"
            )));
        }
        if self.unit_price.is_sign_negative() && !self.unit_price.is_zero() {
            return Err(DomainError::validation(format!(
                "line {line_no}: unit price must not be negative"
            )));
        }
        if self.tax_rate.is_sign_negative() && !self.tax_rate.is_zero() {
            return Err(DomainError::validation(format!(
                "line {line_no}: tax rate must not be negative"
            )));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation(format!("line {line_no}: name is required")));
        }
        if self.checked_amounts().is_none() {
            return Err(DomainError::validation(format!(
                "line {line_no}: amount is out of range"
            )));
        }
        Ok(())
    }
}

/// Tax subtotal for one rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxSubtotal {
    pub rate: Decimal,
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
}

/// Document totals derived from the lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub line_extension: Decimal,
    pub tax_total: Decimal,
    pub payable: Decimal,
    /// One entry per distinct rate, ascending.
    pub subtotals: Vec<TaxSubtotal>,
}

/// Invoice content to be sent.
///
/// Treated as immutable once packaged: resending changed content requires a
/// new invoice number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDocument {
    pub number: String,
    pub profile: InvoiceProfile,
    pub type_code: InvoiceTypeCode,
    pub issue_date: NaiveDate,
    /// ISO 4217, e.g. `TRY`.
    pub currency: String,
    pub supplier: Party,
    pub customer: Party,
    pub lines: Vec<LineItem>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl InvoiceDocument {
    /// Check the invariants required before building XML.
    pub fn validate(&self) -> DomainResult<()> {
        if self.number.trim().is_empty() {
            return Err(DomainError::validation("invoice number is required"));
        }
        if self.currency.trim().len() != 3 {
            return Err(DomainError::validation("currency must be a 3-letter ISO code"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot build invoice without lines"));
        }
        self.supplier.validate("supplier")?;
        self.customer.validate("customer")?;
        let mut payable = Decimal::ZERO;
        for (idx, line) in self.lines.iter().enumerate() {
            line.validate(idx + 1)?;
            payable = line
                .checked_amounts()
                .and_then(|(total, tax)| payable.checked_add(total)?.checked_add(tax))
                .ok_or_else(|| DomainError::validation("invoice total is out of range"))?;
        }
        Ok(())
    }

    pub fn totals(&self) -> Totals {
        let line_extension = sum_rounded(self.lines.iter().map(LineItem::line_total));
        let tax_total = sum_rounded(self.lines.iter().map(LineItem::tax_amount));

        let mut by_rate: BTreeMap<Decimal, (Decimal, Decimal)> = BTreeMap::new();
        for line in &self.lines {
            let entry = by_rate
                .entry(line.tax_rate.normalize())
                .or_insert((Decimal::ZERO, Decimal::ZERO));
            entry.0 = entry.0.saturating_add(line.line_total());
            entry.1 = entry.1.saturating_add(line.tax_amount());
        }

        Totals {
            line_extension,
            tax_total,
            payable: line_extension.saturating_add(tax_total),
            subtotals: by_rate
                .into_iter()
                .map(|(rate, (taxable_amount, tax_amount))| TaxSubtotal {
                    rate,
                    taxable_amount,
                    tax_amount,
                })
                .collect(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn two_line_invoice_totals() {
        let doc = document(vec![
            line("Widget", dec!(1), dec!(1000.00), dec!(18)),
            line("Gadget", dec!(2), dec!(500.00), dec!(18)),
        ]);
        doc.validate().unwrap();

        let totals = doc.totals();
        assert_eq!(totals.line_extension, dec!(2000.00));
        assert_eq!(totals.tax_total, dec!(360.00));
        assert_eq!(totals.payable, dec!(2360.00));
        assert_eq!(totals.subtotals.len(), 1);
        assert_eq!(totals.subtotals[0].rate, dec!(18));
        assert_eq!(totals.subtotals[0].taxable_amount, dec!(2000.00));
    }

    #[test]
    fn line_amounts_round_before_aggregation() {
        let item = line("Bolt", dec!(3), dec!(0.335), dec!(18));
        assert_eq!(item.line_total(), dec!(1.01));
        assert_eq!(item.tax_amount(), dec!(0.18));
    }

    #[test]
    fn subtotals_group_by_rate() {
        let doc = document(vec![
            line("A", dec!(1), dec!(100), dec!(20)),
            line("B", dec!(1), dec!(50), dec!(1)),
            line("C", dec!(2), dec!(10), dec!(20.00)),
        ]);
        let totals = doc.totals();
        let rates: Vec<_> = totals.subtotals.iter().map(|s| s.rate).collect();
        assert_eq!(rates, vec![dec!(1), dec!(20)]);
        assert_eq!(totals.subtotals[1].taxable_amount, dec!(120));
        assert_eq!(totals.subtotals[1].tax_amount, dec!(24.00));
    }

    #[test]
    fn empty_lines_are_rejected() {
        let err = document(vec![]).validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("without lines")));
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let doc = document(vec![line("A", dec!(-1), dec!(10), dec!(18))]);
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("quantity")));
    }

    #[test]
    fn negative_price_is_rejected() {
        let doc = document(vec![line("A", dec!(1), dec!(-10), dec!(18))]);
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("unit price")));
    }

    #[test]
    fn malformed_party_identifier_is_rejected() {
        let mut doc = document(vec![line("A", dec!(1), dec!(10), dec!(18))]);
        doc.customer.identifier = "12AB".to_string();
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.starts_with("customer")));
    }

    #[test]
    fn party_scheme_follows_identifier_length() {
        assert_eq!(party("1234567890", "X").scheme(), "VKN");
        assert_eq!(party("12345678901", "X").scheme(), "TCKN");
    }

    #[test]
    fn padded_tckn_keeps_its_scheme() {
        let padded = party(" 12345678901 ", "X");
        assert_eq!(padded.scheme(), "TCKN");

        let mut doc = document(vec![line("A", dec!(1), dec!(10), dec!(18))]);
        doc.customer = padded;
        doc.validate().unwrap();
    }

    #[test]
    fn overflowing_line_amount_is_rejected() {
        let doc = document(vec![line("A", Decimal::MAX, dec!(2), dec!(18))]);
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg == "line 1: amount is out of range"));
    }

    #[test]
    fn overflowing_tax_is_rejected() {
        let doc = document(vec![line("A", Decimal::MAX, dec!(1), dec!(20))]);
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("out of range")));
    }

    #[test]
    fn overflowing_document_total_is_rejected() {
        let doc = document(vec![
            line("A", Decimal::MAX, dec!(1), dec!(0)),
            line("B", Decimal::MAX, dec!(1), dec!(0)),
        ]);
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg == "invoice total is out of range"));
    }

    #[test]
    fn totals_of_an_unvalidated_document_do_not_panic() {
        let doc = document(vec![line("A", Decimal::MAX, dec!(2), dec!(18))]);
        let totals = doc.totals();
        assert_eq!(totals.line_extension, Decimal::MAX);
    }

    #[test]
    fn profile_round_trips_through_its_code() {
        let json = serde_json::to_string(&InvoiceProfile::Commercial).unwrap();
        assert_eq!(json, "\"TICARIFATURA\"");
        let parsed: InvoiceProfile = serde_json::from_str("\"IHRACAT\"").unwrap();
        assert_eq!(parsed, InvoiceProfile::Other("IHRACAT".to_string()));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the document tax total equals the sum of line tax amounts
        /// and the subtotals reconcile with it.
        #[test]
        fn tax_total_matches_sum_of_lines(
            lines in prop::collection::vec(
                (1i64..10_000, 0i64..10_000_000, prop::sample::select(vec![0u32, 1, 8, 10, 18, 20])),
                1..12,
            )
        ) {
            let items: Vec<LineItem> = lines
                .iter()
                .map(|(qty, price_cents, rate)| {
                    line("item", Decimal::from(*qty), Decimal::new(*price_cents, 2), Decimal::from(*rate))
                })
                .collect();
            let doc = document(items);
            let totals = doc.totals();

            let line_sum: Decimal = doc.lines.iter().map(LineItem::tax_amount).sum();
            let subtotal_sum: Decimal = totals.subtotals.iter().map(|s| s.tax_amount).sum();
            let tolerance = dec!(0.01);

            prop_assert!((totals.tax_total - line_sum).abs() <= tolerance);
            prop_assert!((totals.tax_total - subtotal_sum).abs() <= tolerance);
            prop_assert_eq!(totals.payable, totals.line_extension + totals.tax_total);
        }
    }
}
