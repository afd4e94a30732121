//! Request envelopes for the download web service, and XML scraping
//! helpers for its responses.
//!
//! Requests are SOAP envelopes whose request element carries a detached
//! signature block: a SHA-256 digest of the request element, the signature
//! over that digest from the injected [`Signer`], and the signer's
//! certificate. Responses are scraped by local element name, ignoring
//! namespace prefixes, because the service is inconsistent about them.

use crate::error::{ClientError, ClientResult};
use cofre_core::{FlowDirection, Rfc};
use cofre_signer::Signer;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::macros::format_description;

pub const SUBMIT_ACTION: &str = "http://DescargaMasivaTerceros.sat.gob.mx/ISolicitaDescargaService/SolicitaDescarga";
pub const POLL_ACTION: &str = "http://DescargaMasivaTerceros.sat.gob.mx/IVerificaSolicitudDescargaService/VerificaSolicitudDescarga";
pub const FETCH_ACTION: &str = "http://DescargaMasivaTerceros.sat.gob.mx/IDescargaMasivaTercerosService/Descargar";
pub const VERIFY_ACTION: &str = "http://tempuri.org/IConsultaCFDIService/Consulta";

/// Second-precision ISO-8601 used by the service for period bounds.
pub fn wire_datetime(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    ts.to_offset(time::UtcOffset::UTC)
        .format(&fmt)
        .expect("wire datetime formatting cannot fail")
}

fn soap(body: &str) -> String {
    format!(
        concat!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:des="http://DescargaMasivaTerceros.sat.gob.mx">"#,
            "<s:Header/><s:Body>{}</s:Body></s:Envelope>"
        ),
        body
    )
}

/// Digest-and-sign a request element, returning the signature block.
fn signature_block(signer: &dyn Signer, request_element: &str) -> ClientResult<String> {
    use base64::Engine;
    let engine = base64::engine::general_purpose::STANDARD;

    let digest = Sha256::digest(request_element.as_bytes());
    let digest_b64 = engine.encode(digest);
    let signature = signer
        .sign(digest_b64.as_bytes())
        .map_err(ClientError::Signer)?;

    Ok(format!(
        concat!(
            r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#">"#,
            "<SignedInfo><DigestValue>{digest}</DigestValue></SignedInfo>",
            "<SignatureValue>{signature}</SignatureValue>",
            "<KeyInfo><X509Data><X509Certificate>{certificate}</X509Certificate></X509Data></KeyInfo>",
            "</Signature>"
        ),
        digest = digest_b64,
        signature = engine.encode(signature),
        certificate = signer.certificate_b64(),
    ))
}

/// Envelope for a new bulk-retrieval submission.
pub fn submit_envelope(
    signer: &dyn Signer,
    flow: FlowDirection,
    start: OffsetDateTime,
    end: OffsetDateTime,
    counterparty: Option<&Rfc>,
) -> ClientResult<String> {
    let rfc = signer.rfc();
    let (emisor, receptor) = match flow {
        FlowDirection::Issued => (rfc.as_str().to_string(), counterparty_attr(counterparty)),
        FlowDirection::Received => (counterparty_attr(counterparty), rfc.as_str().to_string()),
    };

    let request = format!(
        concat!(
            r#"<des:solicitud RfcSolicitante="{rfc}" FechaInicial="{start}" FechaFinal="{end}" "#,
            r#"RfcEmisor="{emisor}" RfcReceptor="{receptor}" TipoSolicitud="CFDI">"#
        ),
        rfc = rfc,
        start = wire_datetime(start),
        end = wire_datetime(end),
        emisor = emisor,
        receptor = receptor,
    );
    let signature = signature_block(signer, &request)?;
    Ok(soap(&format!(
        "<des:SolicitaDescarga>{request}{signature}</des:solicitud></des:SolicitaDescarga>"
    )))
}

fn counterparty_attr(counterparty: Option<&Rfc>) -> String {
    counterparty.map(|r| r.as_str().to_string()).unwrap_or_default()
}

/// Envelope for a job status poll.
pub fn poll_envelope(signer: &dyn Signer, job_id: &str) -> ClientResult<String> {
    let request = format!(
        r#"<des:solicitud IdSolicitud="{}" RfcSolicitante="{}">"#,
        escape(job_id),
        signer.rfc(),
    );
    let signature = signature_block(signer, &request)?;
    Ok(soap(&format!(
        "<des:VerificaSolicitudDescarga>{request}{signature}</des:solicitud></des:VerificaSolicitudDescarga>"
    )))
}

/// Envelope for a package download.
pub fn fetch_envelope(signer: &dyn Signer, package_id: &str) -> ClientResult<String> {
    let request = format!(
        r#"<des:peticionDescarga IdPaquete="{}" RfcSolicitante="{}">"#,
        escape(package_id),
        signer.rfc(),
    );
    let signature = signature_block(signer, &request)?;
    Ok(soap(&format!(
        "<des:PeticionDescargaMasivaTercerosEntrada>{request}{signature}</des:peticionDescarga></des:PeticionDescargaMasivaTercerosEntrada>"
    )))
}

/// Envelope for a cancellation-status query. Not signed; the service keys
/// the lookup on the printed expression alone.
pub fn verify_envelope(expression: &str) -> String {
    format!(
        concat!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:tem="http://tempuri.org/">"#,
            "<s:Header/><s:Body><tem:Consulta><tem:expresionImpresa>{}</tem:expresionImpresa>",
            "</tem:Consulta></s:Body></s:Envelope>"
        ),
        escape(expression)
    )
}

// ===== Response scraping =====

/// Text content of the first element with the given local name.
pub(crate) fn element_text(xml: &str, local: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == local.as_bytes() => inside = true,
            Ok(Event::Text(t)) if inside => return t.unescape().ok().map(|s| s.into_owned()),
            Ok(Event::End(e)) if e.local_name().as_ref() == local.as_bytes() => return None,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Text content of every element with the given local name.
pub(crate) fn element_texts(xml: &str, local: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;
    let mut out = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == local.as_bytes() => inside = true,
            Ok(Event::Text(t)) if inside => {
                if let Ok(s) = t.unescape() {
                    out.push(s.into_owned());
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == local.as_bytes() => inside = false,
            Ok(Event::Eof) | Err(_) => return out,
            _ => {}
        }
    }
}

/// Attribute value on the first element with the given local name.
pub(crate) fn attr_value(xml: &str, element: &str, attr: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == element.as_bytes() =>
            {
                for a in e.attributes().flatten() {
                    if a.key.local_name().as_ref() == attr.as_bytes() {
                        return a.unescape_value().ok().map(|v| v.into_owned());
                    }
                }
                return None;
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cofre_signer::MemorySigner;
    use time::macros::datetime;

    fn signer() -> MemorySigner {
        MemorySigner::generate(Rfc::parse("XAXX010101000").unwrap())
    }

    #[test]
    fn wire_datetime_is_second_precision_utc() {
        assert_eq!(
            wire_datetime(datetime!(2024-01-31 18:30:05 -6)),
            "2024-02-01T00:30:05"
        );
    }

    #[test]
    fn submit_envelope_carries_identity_period_and_signature() {
        let s = signer();
        let xml = submit_envelope(
            &s,
            FlowDirection::Issued,
            datetime!(2024-01-01 00:00:00 UTC),
            datetime!(2024-01-31 23:59:59 UTC),
            None,
        )
        .unwrap();
        assert!(xml.contains(r#"RfcSolicitante="XAXX010101000""#));
        assert!(xml.contains(r#"RfcEmisor="XAXX010101000""#));
        assert!(xml.contains(r#"FechaInicial="2024-01-01T00:00:00""#));
        assert!(xml.contains("<SignatureValue>"));
        assert!(xml.contains(s.certificate_b64()));
    }

    #[test]
    fn received_flow_puts_identity_on_receiver_side() {
        let s = signer();
        let xml = submit_envelope(
            &s,
            FlowDirection::Received,
            datetime!(2024-01-01 00:00:00 UTC),
            datetime!(2024-01-31 00:00:00 UTC),
            None,
        )
        .unwrap();
        assert!(xml.contains(r#"RfcReceptor="XAXX010101000""#));
        assert!(xml.contains(r#"RfcEmisor="""#));
    }

    #[test]
    fn scraping_helpers_ignore_namespace_prefixes() {
        let xml = r#"<h:Res xmlns:h="urn:x"><h:Estado>Vigente</h:Estado>
            <h:IdsPaquetes>A_01</h:IdsPaquetes><h:IdsPaquetes>A_02</h:IdsPaquetes></h:Res>"#;
        assert_eq!(element_text(xml, "Estado").as_deref(), Some("Vigente"));
        assert_eq!(element_texts(xml, "IdsPaquetes"), vec!["A_01", "A_02"]);
        assert_eq!(element_text(xml, "Missing"), None);
    }

    #[test]
    fn attr_scraper_reads_result_codes() {
        let xml = r#"<x:SolicitaDescargaResult xmlns:x="urn:x" CodEstatus="5000"
            IdSolicitud="abc-123" Mensaje="Solicitud Aceptada"/>"#;
        assert_eq!(
            attr_value(xml, "SolicitaDescargaResult", "CodEstatus").as_deref(),
            Some("5000")
        );
        assert_eq!(
            attr_value(xml, "SolicitaDescargaResult", "IdSolicitud").as_deref(),
            Some("abc-123")
        );
    }
}
