use cofre_core::{
    DocumentKind, DocumentRecord, FiscalUuid, LineItem, Party, Rfc, StatusCheck,
    VerificationState,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const OWNER: &str = "XAXX010101000";

pub fn owner() -> Rfc {
    Rfc::parse(OWNER).unwrap()
}

fn ts(s: &str) -> OffsetDateTime {
    OffsetDateTime::parse(s, &Rfc3339).unwrap()
}

/// Builder for document records with sensible defaults.
pub struct RecordBuilder {
    record: DocumentRecord,
}

#[allow(dead_code)]
impl RecordBuilder {
    pub fn new(uuid: &str) -> Self {
        let now = ts("2024-03-15T12:00:00Z");
        Self {
            record: DocumentRecord {
                uuid: FiscalUuid::parse(uuid).unwrap(),
                kind: DocumentKind::Income,
                is_payroll_complement: false,
                issue_date: now,
                total: "1000".parse().unwrap(),
                subtotal: None,
                currency: "MXN".to_string(),
                payment_method: Some("PUE".to_string()),
                issuer: Party {
                    rfc: owner(),
                    name: "Empresa Emisora SA de CV".to_string(),
                },
                receiver: Party {
                    rfc: Rfc::parse("XEXX010101000").unwrap(),
                    name: "Cliente Receptor".to_string(),
                },
                line_items: vec![LineItem {
                    description: "Servicios".to_string(),
                    quantity: "1".parse().unwrap(),
                    unit_value: "1000".parse().unwrap(),
                    amount: "1000".parse().unwrap(),
                }],
                status: StatusCheck::unverified(),
                storage_path: format!("{OWNER}/{uuid}.xml"),
                stored_at: now,
                updated_at: now,
            },
        }
    }

    pub fn kind(mut self, kind: DocumentKind) -> Self {
        self.record.kind = kind;
        if kind == DocumentKind::Payroll {
            self.record.is_payroll_complement = true;
        }
        self
    }

    pub fn issued_on(mut self, date: &str) -> Self {
        self.record.issue_date = ts(date);
        self
    }

    pub fn total(mut self, total: &str) -> Self {
        self.record.total = total.parse().unwrap();
        self
    }

    pub fn subtotal(mut self, subtotal: &str) -> Self {
        self.record.subtotal = Some(subtotal.parse().unwrap());
        self
    }

    pub fn status(mut self, state: VerificationState) -> Self {
        self.record.status.state = state;
        self
    }

    pub fn issuer(mut self, rfc: &str, name: &str) -> Self {
        self.record.issuer = Party {
            rfc: Rfc::parse(rfc).unwrap(),
            name: name.to_string(),
        };
        self
    }

    pub fn receiver(mut self, rfc: &str, name: &str) -> Self {
        self.record.receiver = Party {
            rfc: Rfc::parse(rfc).unwrap(),
            name: name.to_string(),
        };
        self
    }

    pub fn build(self) -> DocumentRecord {
        self.record
    }
}

pub fn uuid_n(n: u32) -> String {
    format!("AD662D33-6934-459C-A128-BDF0393E{n:04X}")
}
