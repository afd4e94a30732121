//! CFDI document parsing and classification.

use crate::error::{ClientError, ClientResult};
use cofre_core::{
    DocumentKind, DocumentRecord, FiscalUuid, LineItem, Party, Rfc, StatusCheck,
};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rust_decimal::Decimal;
use time::{OffsetDateTime, PrimitiveDateTime};
use time::macros::format_description;

/// Parses raw CFDI payloads into classified records.
///
/// Matching is by local element name so any namespace prefix convention is
/// accepted; issuers' stamping providers are not consistent about it.
#[derive(Default)]
pub struct DocumentAnalyzer;

/// A parsed document before ownership and storage annotations.
#[derive(Clone, Debug)]
pub struct ParsedDocument {
    pub uuid: FiscalUuid,
    pub kind: DocumentKind,
    pub is_payroll_complement: bool,
    pub issue_date: OffsetDateTime,
    pub total: Decimal,
    pub subtotal: Option<Decimal>,
    pub currency: String,
    pub payment_method: Option<String>,
    pub issuer: Party,
    pub receiver: Party,
    pub line_items: Vec<LineItem>,
}

impl ParsedDocument {
    /// Annotate into a storable record. Verification starts out
    /// `Unverified`; classification fields are final from here on.
    pub fn into_record(self, storage_path: String) -> DocumentRecord {
        let now = OffsetDateTime::now_utc();
        DocumentRecord {
            uuid: self.uuid,
            kind: self.kind,
            is_payroll_complement: self.is_payroll_complement,
            issue_date: self.issue_date,
            total: self.total,
            subtotal: self.subtotal,
            currency: self.currency,
            payment_method: self.payment_method,
            issuer: self.issuer,
            receiver: self.receiver,
            line_items: self.line_items,
            status: StatusCheck::unverified(),
            storage_path,
            stored_at: now,
            updated_at: now,
        }
    }
}

#[derive(Default)]
struct RawComprobante {
    kind_code: Option<String>,
    issue_date: Option<String>,
    total: Option<String>,
    subtotal: Option<String>,
    currency: Option<String>,
    payment_method: Option<String>,
}

#[derive(Default)]
struct RawParty {
    rfc: Option<String>,
    name: Option<String>,
}

impl DocumentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Parse one CFDI payload.
    ///
    /// A missing root element or fiscal uuid is a `MalformedDocument`;
    /// callers skip and count it, never abort the batch.
    pub fn parse(&self, xml: &[u8]) -> ClientResult<ParsedDocument> {
        let text = std::str::from_utf8(xml)
            .map_err(|e| ClientError::MalformedDocument(format!("not UTF-8: {e}")))?;

        let mut reader = Reader::from_str(text);
        let mut root: Option<RawComprobante> = None;
        let mut issuer = RawParty::default();
        let mut receiver = RawParty::default();
        let mut line_items: Vec<ClientResult<LineItem>> = Vec::new();
        let mut uuid: Option<String> = None;
        let mut has_payroll_complement = false;

        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    return Err(ClientError::MalformedDocument(format!("XML error: {e}")));
                }
            };
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    match e.local_name().as_ref() {
                        b"Comprobante" if root.is_none() => {
                            root = Some(read_comprobante(e));
                        }
                        // The payroll complement nests its own Emisor and
                        // Receptor; only the first (top-level) pair counts.
                        b"Emisor" if issuer.rfc.is_none() => {
                            issuer = read_party(e);
                        }
                        b"Receptor" if receiver.rfc.is_none() => {
                            receiver = read_party(e);
                        }
                        b"Concepto" => line_items.push(read_line_item(e)),
                        b"TimbreFiscalDigital" if uuid.is_none() => {
                            uuid = attr(e, b"UUID");
                        }
                        b"Nomina" => has_payroll_complement = true,
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let root = root
            .ok_or_else(|| ClientError::MalformedDocument("missing Comprobante root".into()))?;
        let uuid = uuid
            .ok_or_else(|| ClientError::MalformedDocument("missing fiscal uuid stamp".into()))?;
        let uuid = FiscalUuid::parse(&uuid)
            .map_err(|e| ClientError::MalformedDocument(format!("bad fiscal uuid: {e}")))?;

        let kind_code = root
            .kind_code
            .ok_or_else(|| ClientError::MalformedDocument("missing TipoDeComprobante".into()))?;
        let raw_kind = DocumentKind::from_code(&kind_code)
            .map_err(|e| ClientError::MalformedDocument(e.to_string()))?;
        // A payroll complement always classifies as payroll, whatever the
        // raw type code says.
        let kind = if has_payroll_complement {
            DocumentKind::Payroll
        } else {
            raw_kind
        };
        let is_payroll_complement = has_payroll_complement || raw_kind == DocumentKind::Payroll;

        let issue_date = parse_issue_date(
            &root
                .issue_date
                .ok_or_else(|| ClientError::MalformedDocument("missing Fecha".into()))?,
        )?;
        let total = parse_amount(
            &root
                .total
                .ok_or_else(|| ClientError::MalformedDocument("missing Total".into()))?,
            "Total",
        )?;
        let subtotal = root
            .subtotal
            .as_deref()
            .map(|s| parse_amount(s, "SubTotal"))
            .transpose()?;

        Ok(ParsedDocument {
            uuid,
            kind,
            is_payroll_complement,
            issue_date,
            total,
            subtotal,
            currency: root.currency.unwrap_or_else(|| "MXN".to_string()),
            payment_method: root.payment_method,
            issuer: into_party(issuer, "Emisor")?,
            receiver: into_party(receiver, "Receptor")?,
            line_items: line_items.into_iter().collect::<ClientResult<Vec<_>>>()?,
        })
    }
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn read_comprobante(e: &BytesStart<'_>) -> RawComprobante {
    RawComprobante {
        kind_code: attr(e, b"TipoDeComprobante"),
        issue_date: attr(e, b"Fecha"),
        total: attr(e, b"Total"),
        subtotal: attr(e, b"SubTotal"),
        currency: attr(e, b"Moneda"),
        payment_method: attr(e, b"MetodoPago"),
    }
}

fn read_party(e: &BytesStart<'_>) -> RawParty {
    RawParty {
        rfc: attr(e, b"Rfc"),
        name: attr(e, b"Nombre"),
    }
}

fn read_line_item(e: &BytesStart<'_>) -> ClientResult<LineItem> {
    let description = attr(e, b"Descripcion").unwrap_or_default();
    let quantity = parse_amount(&attr(e, b"Cantidad").unwrap_or_else(|| "1".into()), "Cantidad")?;
    let unit_value = parse_amount(
        &attr(e, b"ValorUnitario").unwrap_or_else(|| "0".into()),
        "ValorUnitario",
    )?;
    let amount = parse_amount(&attr(e, b"Importe").unwrap_or_else(|| "0".into()), "Importe")?;
    Ok(LineItem {
        description,
        quantity,
        unit_value,
        amount,
    })
}

fn into_party(raw: RawParty, element: &str) -> ClientResult<Party> {
    let rfc = raw
        .rfc
        .ok_or_else(|| ClientError::MalformedDocument(format!("missing {element} Rfc")))?;
    let rfc = Rfc::parse(&rfc)
        .map_err(|e| ClientError::MalformedDocument(format!("bad {element} Rfc: {e}")))?;
    Ok(Party {
        rfc,
        name: raw.name.unwrap_or_default(),
    })
}

fn parse_amount(s: &str, field: &str) -> ClientResult<Decimal> {
    s.trim()
        .parse()
        .map_err(|e| ClientError::MalformedDocument(format!("bad {field} {s:?}: {e}")))
}

/// The stamp carries a local datetime without offset; the convention is
/// central-zone issuance but records normalize to UTC wall time.
fn parse_issue_date(s: &str) -> ClientResult<OffsetDateTime> {
    let fmt = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(s.trim(), &fmt)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| ClientError::MalformedDocument(format!("bad Fecha {s:?}: {e}")))
}
