//! UBL-TR 1.2 `Invoice` builder.

use tracing::debug;

use einvoice_core::InvoiceUuid;
use einvoice_invoicing::{InvoiceDocument, LineItem, Party, Totals};

use crate::error::UblError;
use crate::xml::{XmlBuilder, XmlResult, format_plain};

pub const UBL_VERSION: &str = "2.1";
pub const CUSTOMIZATION_ID: &str = "TR1.2";

const NS_INVOICE: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub(crate) const NS_CAC: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub(crate) const NS_CBC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";

const VAT_NAME: &str = "KDV";
const VAT_TYPE_CODE: &str = "0015";

/// A serialized invoice together with the identity it was built under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltInvoice {
    pub uuid: InvoiceUuid,
    pub xml: String,
    pub totals: Totals,
}

/// Validate `doc` and serialize it under a freshly generated UUID.
pub fn build_invoice_xml(doc: &InvoiceDocument) -> Result<BuiltInvoice, UblError> {
    build_invoice_xml_with_uuid(doc, InvoiceUuid::new())
}

/// Same as [`build_invoice_xml`] with a caller-chosen UUID; the output is a
/// pure function of the inputs.
pub fn build_invoice_xml_with_uuid(
    doc: &InvoiceDocument,
    uuid: InvoiceUuid,
) -> Result<BuiltInvoice, UblError> {
    doc.validate()?;
    let totals = doc.totals();

    let mut xml = XmlBuilder::new()?;
    xml.open(
        "Invoice",
        &[("xmlns", NS_INVOICE), ("xmlns:cac", NS_CAC), ("xmlns:cbc", NS_CBC)],
    )?;

    let uuid_text = uuid.to_string();
    let issue_date = doc.issue_date.format("%Y-%m-%d").to_string();
    let line_count = doc.lines.len().to_string();

    xml.text("cbc:UBLVersionID", UBL_VERSION)?
        .text("cbc:CustomizationID", CUSTOMIZATION_ID)?
        .text("cbc:ProfileID", doc.profile.code())?
        .text("cbc:ID", doc.number.trim())?
        .text("cbc:CopyIndicator", "false")?
        .text("cbc:UUID", &uuid_text)?
        .text("cbc:IssueDate", &issue_date)?
        .text("cbc:InvoiceTypeCode", doc.type_code.code())?;
    for note in doc.notes.iter().filter(|n| !n.trim().is_empty()) {
        xml.text("cbc:Note", note)?;
    }
    xml.text("cbc:DocumentCurrencyCode", &doc.currency)?
        .text("cbc:LineCountNumeric", &line_count)?;

    xml.open("cac:AccountingSupplierParty", &[])?;
    write_party(&mut xml, &doc.supplier)?;
    xml.close("cac:AccountingSupplierParty")?;

    xml.open("cac:AccountingCustomerParty", &[])?;
    write_party(&mut xml, &doc.customer)?;
    xml.close("cac:AccountingCustomerParty")?;

    write_document_tax(&mut xml, &totals, &doc.currency)?;
    write_monetary_total(&mut xml, &totals, &doc.currency)?;

    for (idx, line) in doc.lines.iter().enumerate() {
        write_line(&mut xml, idx + 1, line, &doc.currency)?;
    }

    xml.close("Invoice")?;
    let xml = xml.finish()?;

    debug!(
        invoice_number = %doc.number,
        invoice_uuid = %uuid,
        lines = doc.lines.len(),
        payable = %totals.payable,
        "invoice xml built"
    );

    Ok(BuiltInvoice { uuid, xml, totals })
}

fn write_party(xml: &mut XmlBuilder, party: &Party) -> XmlResult<()> {
    xml.open("cac:Party", &[])?;

    xml.open("cac:PartyIdentification", &[])?
        .leaf("cbc:ID", &[("schemeID", party.scheme())], party.identifier.trim())?
        .close("cac:PartyIdentification")?;

    xml.open("cac:PartyName", &[])?
        .text("cbc:Name", &party.name)?
        .close("cac:PartyName")?;

    let address = &party.address;
    xml.open("cac:PostalAddress", &[])?;
    if let Some(street) = &address.street {
        xml.text("cbc:StreetName", street)?;
    }
    xml.text("cbc:CitySubdivisionName", &address.district)?
        .text("cbc:CityName", &address.city)?;
    if let Some(zone) = &address.postal_zone {
        xml.text("cbc:PostalZone", zone)?;
    }
    xml.open("cac:Country", &[])?
        .text("cbc:Name", &address.country)?
        .close("cac:Country")?;
    xml.close("cac:PostalAddress")?;

    if let Some(office) = &party.tax_office {
        xml.open("cac:PartyTaxScheme", &[])?
            .open("cac:TaxScheme", &[])?
            .text("cbc:Name", office)?
            .close("cac:TaxScheme")?
            .close("cac:PartyTaxScheme")?;
    }

    xml.close("cac:Party")?;
    Ok(())
}

fn write_tax_subtotal(
    xml: &mut XmlBuilder,
    taxable: rust_decimal::Decimal,
    tax: rust_decimal::Decimal,
    rate: rust_decimal::Decimal,
    currency: &str,
) -> XmlResult<()> {
    xml.open("cac:TaxSubtotal", &[])?
        .amount("cbc:TaxableAmount", taxable, currency)?
        .amount("cbc:TaxAmount", tax, currency)?
        .text("cbc:Percent", &format_plain(rate))?
        .open("cac:TaxCategory", &[])?
        .open("cac:TaxScheme", &[])?
        .text("cbc:Name", VAT_NAME)?
        .text("cbc:TaxTypeCode", VAT_TYPE_CODE)?
        .close("cac:TaxScheme")?
        .close("cac:TaxCategory")?
        .close("cac:TaxSubtotal")?;
    Ok(())
}

fn write_document_tax(xml: &mut XmlBuilder, totals: &Totals, currency: &str) -> XmlResult<()> {
    xml.open("cac:TaxTotal", &[])?
        .amount("cbc:TaxAmount", totals.tax_total, currency)?;
    for subtotal in &totals.subtotals {
        write_tax_subtotal(
            xml,
            subtotal.taxable_amount,
            subtotal.tax_amount,
            subtotal.rate,
            currency,
        )?;
    }
    xml.close("cac:TaxTotal")?;
    Ok(())
}

fn write_monetary_total(xml: &mut XmlBuilder, totals: &Totals, currency: &str) -> XmlResult<()> {
    xml.open("cac:LegalMonetaryTotal", &[])?
        .amount("cbc:LineExtensionAmount", totals.line_extension, currency)?
        .amount("cbc:TaxExclusiveAmount", totals.line_extension, currency)?
        .amount("cbc:TaxInclusiveAmount", totals.payable, currency)?
        .amount("cbc:PayableAmount", totals.payable, currency)?
        .close("cac:LegalMonetaryTotal")?;
    Ok(())
}

fn write_line(xml: &mut XmlBuilder, line_no: usize, line: &LineItem, currency: &str) -> XmlResult<()> {
    let total = line.line_total();
    let tax = line.tax_amount();

    xml.open("cac:InvoiceLine", &[])?
        .text("cbc:ID", &line_no.to_string())?
        .leaf(
            "cbc:InvoicedQuantity",
            &[("unitCode", line.unit_code.as_str())],
            &format_plain(line.quantity),
        )?
        .amount("cbc:LineExtensionAmount", total, currency)?;

    xml.open("cac:TaxTotal", &[])?
        .amount("cbc:TaxAmount", tax, currency)?;
    write_tax_subtotal(xml, total, tax, line.tax_rate, currency)?;
    xml.close("cac:TaxTotal")?;

    xml.open("cac:Item", &[])?
        .text("cbc:Name", &line.name)?
        .close("cac:Item")?;
    xml.open("cac:Price", &[])?
        .price("cbc:PriceAmount", line.unit_price, currency)?
        .close("cac:Price")?;

    xml.close("cac:InvoiceLine")?;
    Ok(())
}
