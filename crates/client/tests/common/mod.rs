use cofre_core::{PollConfig, Rfc, VerifyConfig};
use cofre_client::{ProtocolClient, StatusVerifier};
use cofre_signer::MemorySigner;
use std::io::Write;
use std::time::Duration;

pub const RFC: &str = "XAXX010101000";

pub fn signer() -> MemorySigner {
    MemorySigner::generate(Rfc::parse(RFC).unwrap())
}

/// Poll config tuned for tests: no real waiting.
pub fn fast_poll() -> PollConfig {
    PollConfig {
        base_delay_ms: 1,
        max_delay_ms: 2,
        max_attempts: 10,
        empty_poll_limit: 6,
    }
}

pub fn client(base_url: &str) -> ProtocolClient {
    ProtocolClient::new(base_url, Duration::from_secs(5), fast_poll()).unwrap()
}

#[allow(dead_code)]
pub fn verifier(base_url: &str) -> StatusVerifier {
    StatusVerifier::new(
        base_url,
        Duration::from_secs(5),
        VerifyConfig {
            concurrency: 4,
            inter_batch_delay_ms: 1,
        },
    )
    .unwrap()
}

pub fn soap(body: &str) -> String {
    format!(
        concat!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">"#,
            "<s:Body>{}</s:Body></s:Envelope>"
        ),
        body
    )
}

pub fn submit_ok(job_id: &str) -> String {
    soap(&format!(
        concat!(
            r#"<SolicitaDescargaResponse xmlns="http://DescargaMasivaTerceros.sat.gob.mx">"#,
            r#"<SolicitaDescargaResult IdSolicitud="{}" CodEstatus="5000" Mensaje="Solicitud Aceptada"/>"#,
            "</SolicitaDescargaResponse>"
        ),
        job_id
    ))
}

pub fn submit_code(code: &str, message: &str) -> String {
    soap(&format!(
        concat!(
            r#"<SolicitaDescargaResponse xmlns="http://DescargaMasivaTerceros.sat.gob.mx">"#,
            r#"<SolicitaDescargaResult CodEstatus="{}" Mensaje="{}"/>"#,
            "</SolicitaDescargaResponse>"
        ),
        code, message
    ))
}

pub fn poll_response(state: u8, code: &str, count: u64, packages: &[&str]) -> String {
    let ids: String = packages
        .iter()
        .map(|p| format!("<IdsPaquetes>{p}</IdsPaquetes>"))
        .collect();
    soap(&format!(
        concat!(
            r#"<VerificaSolicitudDescargaResponse xmlns="http://DescargaMasivaTerceros.sat.gob.mx">"#,
            r#"<VerificaSolicitudDescargaResult CodEstatus="5000" EstadoSolicitud="{}" "#,
            r#"CodigoEstadoSolicitud="{}" NumeroCFDIs="{}" Mensaje="Solicitud Aceptada">{}"#,
            "</VerificaSolicitudDescargaResult></VerificaSolicitudDescargaResponse>"
        ),
        state, code, count, ids
    ))
}

pub fn fetch_response(package_b64: &str) -> String {
    soap(&format!(
        concat!(
            r#"<DescargarResponse xmlns="http://DescargaMasivaTerceros.sat.gob.mx">"#,
            "<Paquete>{}</Paquete></DescargarResponse>"
        ),
        package_b64
    ))
}

#[allow(dead_code)]
pub fn consulta_response(estado: &str, cancellation: &str) -> String {
    soap(&format!(
        concat!(
            r#"<ConsultaResponse xmlns="http://tempuri.org/">"#,
            r#"<ConsultaResult xmlns:a="http://schemas.datacontract.org/2004/07/Sat.Cfdi.Negocio.ConsultaCfdi.Servicio">"#,
            "<a:CodigoEstatus>S - Comprobante obtenido satisfactoriamente.</a:CodigoEstatus>",
            "<a:Estado>{}</a:Estado><a:EstatusCancelacion>{}</a:EstatusCancelacion>",
            "</ConsultaResult></ConsultaResponse>"
        ),
        estado, cancellation
    ))
}

pub fn cfdi_xml(uuid: &str, kind: &str, total: &str) -> String {
    format!(
        concat!(
            r#"<cfdi:Comprobante xmlns:cfdi="http://www.sat.gob.mx/cfd/4" Version="4.0" "#,
            r#"Fecha="2024-03-20T10:15:30" TipoDeComprobante="{kind}" Total="{total}" Moneda="MXN">"#,
            r#"<cfdi:Emisor Rfc="XAXX010101000" Nombre="Empresa Emisora"/>"#,
            r#"<cfdi:Receptor Rfc="XEXX010101000" Nombre="Cliente Receptor"/>"#,
            r#"<cfdi:Complemento><tfd:TimbreFiscalDigital "#,
            r#"xmlns:tfd="http://www.sat.gob.mx/TimbreFiscalDigital" UUID="{uuid}"/>"#,
            "</cfdi:Complemento></cfdi:Comprobante>"
        ),
        kind = kind,
        total = total,
        uuid = uuid
    )
}

/// Build a base64-encoded package archive from named XML payloads.
pub fn package_b64(entries: &[(&str, &str)]) -> String {
    use base64::Engine;
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    base64::engine::general_purpose::STANDARD.encode(cursor.into_inner())
}
