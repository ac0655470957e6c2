use axum::http;
use headers::{Header, HeaderName, HeaderValue};

// `Content-Disposition: attachment` carrying the name the browser should save
// the download under.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ContentDisposition {
    pub filename: String,
}

impl ContentDisposition {
    pub fn attachment(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }

    // Quoted-string fallback for agents that ignore `filename*`.
    fn ascii_fallback(&self) -> String {
        self.filename
            .chars()
            .map(|c| match c {
                '"' | '\\' => '_',
                c if c.is_ascii() && !c.is_ascii_control() => c,
                _ => '_',
            })
            .collect()
    }

    fn needs_extended_form(&self) -> bool {
        self.filename
            .chars()
            .any(|c| !c.is_ascii() || c.is_ascii_control() || c == '"' || c == '\\')
    }
}

impl Header for ContentDisposition {
    fn name() -> &'static HeaderName {
        &http::header::CONTENT_DISPOSITION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let value = value.to_str().map_err(|_| headers::Error::invalid())?;

        let mut parts = value.split(';').map(str::trim);
        if !parts
            .next()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("attachment"))
        {
            return Err(headers::Error::invalid());
        }

        let mut plain = None;
        let mut extended = None;
        for part in parts {
            let Some((key, val)) = part.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "filename" => plain = Some(val.trim().trim_matches('"').to_string()),
                "filename*" => {
                    let encoded = val.trim();
                    let encoded = encoded
                        .strip_prefix("UTF-8''")
                        .or_else(|| encoded.strip_prefix("utf-8''"))
                        .ok_or_else(headers::Error::invalid)?;
                    let decoded =
                        urlencoding::decode(encoded).map_err(|_| headers::Error::invalid())?;
                    extended = Some(decoded.into_owned());
                }
                _ => {}
            }
        }

        extended
            .or(plain)
            .map(ContentDisposition::attachment)
            .ok_or_else(headers::Error::invalid)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let mut str = format!("attachment; filename=\"{}\"", self.ascii_fallback());
        if self.needs_extended_form() {
            str.push_str("; filename*=UTF-8''");
            str.push_str(&urlencoding::encode(&self.filename));
        }

        let value = HeaderValue::from_str(&str);
        if let Ok(value) = value {
            values.extend(std::iter::once(value));
        }
    }
}
