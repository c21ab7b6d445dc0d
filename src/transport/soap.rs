//! SOAP 1.1 over HTTP transport (`HTTP::SOAP`).
//!
//! Requests are a single operation element inside a SOAP envelope. Responses
//! are flattened into a one-level map keyed by element local name: with
//! nested or repeated elements the last text value seen for a name wins.

use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

use super::auth::Auth;
use super::client::{ClientPool, HttpSettings};
use super::{apply_additional_headers, insert_header, Request, Response, Transport, SOAP};
use crate::errors::TransportError;
use crate::models::{value_to_string, Payload, TransportHttpConfig};

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

const FAULT_PREFIXES: [&str; 3] = ["", "soap:", "SOAP-ENV:"];

pub struct SoapTransport {
    clients: ClientPool,
}

impl SoapTransport {
    pub fn new(settings: HttpSettings) -> Result<Self, TransportError> {
        Ok(Self {
            clients: ClientPool::new(settings)?,
        })
    }
}

/// A SOAP Fault returned by the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapFault {
    pub code: String,
    pub string: String,
    pub detail: String,
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOAP Fault: {} - {}", self.code, self.string)?;
        if !self.detail.is_empty() {
            write!(f, " (detail: {})", self.detail)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SoapTransport {
    fn kind(&self) -> &str {
        SOAP
    }

    async fn execute(
        &self,
        config: &TransportHttpConfig,
        request: &Request,
    ) -> Result<Response, TransportError> {
        let envelope = build_envelope(config, request);
        let endpoint = config.soap_endpoint();

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, CONTENT_TYPE.as_str(), &content_type(config))?;
        if !config.soap_action.is_empty() || !request.operation.is_empty() {
            insert_header(&mut headers, "SOAPAction", &config.soap_action_for(&request.operation))?;
        }
        apply_additional_headers(&mut headers, config)?;
        Auth::from_config(&config.authentication).apply(&mut headers)?;

        let mut builder = self
            .clients
            .client_for(config)?
            .post(&endpoint)
            .headers(headers)
            .body(envelope);
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        tracing::debug!(endpoint = %endpoint, operation = %request.operation, "SOAP request");
        let started = Instant::now();

        let resp = builder.send().await?;
        let status = resp.status();
        let resp_headers = resp.headers().clone();
        let raw = resp.bytes().await?;

        tracing::debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = raw.len(),
            "SOAP response"
        );

        let mut response = Response::from_http(status, &resp_headers, raw);
        if !response.raw.is_empty() {
            let text = response.text();
            if let Some(fault) = detect_fault(&text) {
                tracing::debug!(fault_code = %fault.code, "SOAP fault received");
                response.success = false;
                response.error = Some(fault.to_string());
            } else {
                match parse_response(&text) {
                    Ok(data) => response.data = Some(data),
                    Err(e) => {
                        response.success = false;
                        response.error = Some(format!("Failed to parse SOAP response: {}", e));
                    }
                }
            }
        }
        response.set_http_error();

        Ok(response)
    }

    async fn test_connection(&self, config: &TransportHttpConfig) -> Result<(), TransportError> {
        let mut headers = HeaderMap::new();
        Auth::from_config(&config.authentication).apply(&mut headers)?;

        self.clients
            .client_for(config)?
            .get(config.soap_endpoint())
            .headers(headers)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        Ok(())
    }
}

fn content_type(config: &TransportHttpConfig) -> String {
    let charset = if config.encoding.is_empty() {
        "utf-8"
    } else {
        config.encoding.as_str()
    };
    format!("text/xml; charset={}", charset)
}

/// `<Operation xmlns="ns"><key>value</key>...</Operation>`
pub fn build_body(config: &TransportHttpConfig, request: &Request) -> String {
    let mut body = format!(
        r#"<{} xmlns="{}">"#,
        request.operation,
        escape(config.soap_namespace())
    );
    for (key, value) in &request.data {
        body.push_str(&format!(
            "<{key}>{}</{key}>",
            escape(value_to_string(value).as_str())
        ));
    }
    body.push_str(&format!("</{}>", request.operation));
    body
}

/// Full SOAP 1.1 envelope for `request`, including the XML declaration.
pub fn build_envelope(config: &TransportHttpConfig, request: &Request) -> String {
    let encoding = if config.encoding.is_empty() {
        "UTF-8"
    } else {
        config.encoding.as_str()
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"{}\"?>\n\
         <soap:Envelope xmlns:soap=\"{}\">\n  <soap:Body>\n    {}\n  </soap:Body>\n</soap:Envelope>",
        encoding,
        SOAP_ENV_NS,
        build_body(config, request)
    )
}

/// Look for a SOAP Fault in the raw response text.
///
/// Runs before any XML parsing so that faults are recognised even in bodies
/// that would not parse cleanly.
pub fn detect_fault(text: &str) -> Option<SoapFault> {
    if !text.contains("Fault") || !(text.contains("faultcode") || text.contains("faultstring")) {
        return None;
    }
    let fault = SoapFault {
        code: extract_xml_value(text, "faultcode"),
        string: extract_xml_value(text, "faultstring"),
        detail: extract_xml_value(text, "detail"),
    };
    if fault.code.is_empty() && fault.string.is_empty() {
        return None;
    }
    Some(fault)
}

/// Text between `<element>` and its closing tag, tolerating the `soap:` and
/// `SOAP-ENV:` prefixes. Empty when not found.
fn extract_xml_value(text: &str, element: &str) -> String {
    for prefix in FAULT_PREFIXES {
        let start_tag = format!("<{}{}>", prefix, element);
        let Some(start) = text.find(&start_tag) else {
            continue;
        };
        let rest = &text[start + start_tag.len()..];
        for end_prefix in FAULT_PREFIXES {
            let end_tag = format!("</{}{}>", end_prefix, element);
            if let Some(end) = rest.find(&end_tag) {
                return rest[..end].trim().to_string();
            }
        }
    }
    String::new()
}

/// Flatten a SOAP response into a map of element name → last text value.
///
/// For a SOAP 1.1 envelope only the `Body` content is walked; any other
/// document is walked whole.
pub fn parse_response(xml: &str) -> Result<Payload, String> {
    let mut reader = NsReader::from_str(xml);
    let mut result = Payload::new();
    let mut stack: Vec<String> = Vec::new();
    let mut seen_root = false;
    let mut envelope = false;
    let mut in_body = false;

    loop {
        let (ns, event) = reader.read_resolved_event().map_err(|e| e.to_string())?;
        match event {
            Event::Start(start) => {
                let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                if !seen_root {
                    seen_root = true;
                    envelope = local == "Envelope"
                        && matches!(&ns, ResolveResult::Bound(n) if n.as_ref() == SOAP_ENV_NS.as_bytes());
                } else if envelope && stack.len() == 1 && local == "Body" {
                    in_body = true;
                }
                stack.push(local);
            }
            Event::End(_) => {
                stack.pop();
                if envelope && stack.len() == 1 {
                    in_body = false;
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                record(&mut result, &stack, envelope, in_body, &text);
            }
            Event::CData(cdata) => {
                let raw = cdata.into_inner();
                let text = String::from_utf8_lossy(&raw);
                record(&mut result, &stack, envelope, in_body, &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(format!("unexpected end of document inside <{}>", stack.join("><")));
    }

    Ok(result)
}

fn record(result: &mut Payload, stack: &[String], envelope: bool, in_body: bool, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    // Inside an envelope, text directly under Body (depth 2) has no element
    // of its own to be keyed by.
    if envelope && !(in_body && stack.len() > 2) {
        return;
    }
    if let Some(key) = stack.last() {
        result.insert(key.clone(), Value::String(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(op: &str, data: Value) -> Request {
        Request::new(op, data.as_object().cloned().unwrap())
    }

    #[test]
    fn test_body_uses_namespace_and_escapes_values() {
        let config = TransportHttpConfig {
            namespace: "urn:tickets".into(),
            ..Default::default()
        };
        let body = build_body(&config, &request("TicketCreate", json!({"Title": "a < b & c", "Priority": 3})));
        assert_eq!(
            body,
            r#"<TicketCreate xmlns="urn:tickets"><Priority>3</Priority><Title>a &lt; b &amp; c</Title></TicketCreate>"#
        );
    }

    #[test]
    fn test_envelope_defaults_to_tempuri() {
        let envelope = build_envelope(&TransportHttpConfig::default(), &request("Ping", json!({})));
        assert!(envelope.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(envelope.contains(r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#));
        assert!(envelope.contains(r#"<Ping xmlns="http://tempuri.org/"></Ping>"#));
    }

    #[test]
    fn test_envelope_is_parseable_by_our_own_reader() {
        let envelope = build_envelope(
            &TransportHttpConfig::default(),
            &request("GetUser", json!({"UserID": "42"})),
        );
        let data = parse_response(&envelope).unwrap();
        assert_eq!(data["UserID"], "42");
    }

    #[test]
    fn test_detects_prefixed_fault() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><soap:Fault><faultcode>soap:Server</faultcode><faultstring>X</faultstring></soap:Fault></soap:Body></soap:Envelope>"#;
        let fault = detect_fault(xml).unwrap();
        assert_eq!(fault.code, "soap:Server");
        assert_eq!(fault.string, "X");
        assert_eq!(fault.to_string(), "SOAP Fault: soap:Server - X");
    }

    #[test]
    fn test_fault_detail_is_surfaced() {
        let xml = r#"<SOAP-ENV:Fault><SOAP-ENV:faultcode>Client</SOAP-ENV:faultcode><SOAP-ENV:faultstring>Bad input</SOAP-ENV:faultstring><detail>field Title missing</detail></SOAP-ENV:Fault>"#;
        let fault = detect_fault(xml).unwrap();
        assert_eq!(fault.code, "Client");
        assert_eq!(fault.string, "Bad input");
        assert_eq!(fault.detail, "field Title missing");
        assert!(fault.to_string().ends_with("(detail: field Title missing)"));
    }

    #[test]
    fn test_word_fault_without_fault_elements_is_not_a_fault() {
        assert!(detect_fault("<Result>No Fault here</Result>").is_none());
        assert!(detect_fault("<Fault><faultcode></faultcode></Fault>").is_none());
    }

    #[test]
    fn test_envelope_body_is_flattened() {
        let xml = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header><Token>hdr</Token></soap:Header>
  <soap:Body>
    <GetUserResponse xmlns="urn:users">
      <User>
        <ID>42</ID>
        <Name>Ada &amp; Co</Name>
      </User>
    </GetUserResponse>
  </soap:Body>
</soap:Envelope>"#;
        let data = parse_response(xml).unwrap();
        assert_eq!(Value::Object(data), json!({"ID": "42", "Name": "Ada & Co"}));
    }

    #[test]
    fn test_same_named_leaves_overwrite_across_depths() {
        let xml = r#"<Result><Name>outer</Name><Child><Name>inner</Name></Child></Result>"#;
        let data = parse_response(xml).unwrap();
        assert_eq!(data["Name"], "inner");
    }

    #[test]
    fn test_non_envelope_document_is_walked_whole() {
        // SOAP 1.2 namespace is not recognised as an envelope.
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Header><Token>t</Token></env:Header><env:Body><Value>1</Value></env:Body></env:Envelope>"#;
        let data = parse_response(xml).unwrap();
        assert_eq!(Value::Object(data), json!({"Token": "t", "Value": "1"}));
    }

    #[test]
    fn test_mixed_content_is_keyed_by_parent() {
        let xml = r#"<Outer><Inner>a</Inner>tail</Outer>"#;
        let data = parse_response(xml).unwrap();
        assert_eq!(data["Inner"], "a");
        assert_eq!(data["Outer"], "tail");
    }

    #[test]
    fn test_cdata_is_text() {
        let data = parse_response("<Msg><![CDATA[<b>hi</b>]]></Msg>").unwrap();
        assert_eq!(data["Msg"], "<b>hi</b>");
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(parse_response("<a><b>1</a>").is_err());
        assert!(parse_response("<a><b>1</b>").is_err());
    }

    #[test]
    fn test_content_type_honours_encoding() {
        let mut config = TransportHttpConfig::default();
        assert_eq!(content_type(&config), "text/xml; charset=utf-8");
        config.encoding = "ISO-8859-1".into();
        assert_eq!(content_type(&config), "text/xml; charset=ISO-8859-1");
    }
}
