use crate::utils::error::{ProcessorError, Result};
use regex::Regex;
use std::borrow::Cow;

/// Text encoding of the raw instrument export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// ЛОМО monochromator software writes Cyrillic headers in cp1251.
    Windows1251,
}

#[derive(Debug, Clone)]
pub enum Layout {
    /// Rows of numbers separated by `delimiter`, decimals written with `radix_point`.
    Delimited { delimiter: Regex, radix_point: char },
    /// A header line followed by one count per line; x is evenly spaced over `x_range`.
    Counts { x_range: (f64, f64) },
}

#[derive(Debug, Clone)]
pub struct Filetype {
    pub key: &'static str,
    pub layout: Layout,
    /// Number of leading lines before the data block.
    pub data_start: usize,
    /// Number of trailing lines after the data block.
    pub data_trailer: usize,
    pub encoding: Encoding,
    line_matchers: Vec<Regex>,
}

impl Filetype {
    /// True when every matcher accepts the corresponding leading line.
    pub fn matches(&self, text: &str) -> bool {
        let mut lines = text.lines();
        self.line_matchers.iter().all(|matcher| {
            lines
                .next()
                .map(|line| matcher.is_match(line.trim_end()))
                .unwrap_or(false)
        })
    }

    pub fn decode<'a>(&self, content: &'a [u8]) -> Cow<'a, str> {
        decode(content, self.encoding)
    }
}

struct FiletypeDef {
    key: &'static str,
    radix_point: char,
    field_delimiter: Option<&'static str>,
    split: (usize, usize),
    line_matchers: &'static [&'static str],
    encoding: Encoding,
}

// Order matters when sniffing: the first entry whose matchers accept a file wins.
const DEFINITIONS: &[FiletypeDef] = &[
    FiletypeDef {
        key: "libs.spectable",
        radix_point: ',',
        field_delimiter: Some("\t"),
        split: (2, 0),
        line_matchers: &[
            r"^Wavelenght[ \t]+Spectrum$",
            r"^Integration delay[ \t]+[+-]?([0-9]*[,])?[0-9]+$",
            r"^[+-]?([0-9]*[,])?[0-9]+\t[+-]?([0-9]*[,])?[0-9]+$",
        ],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "libs.spec",
        radix_point: ',',
        field_delimiter: Some("[ \t]+"),
        split: (2, 0),
        line_matchers: &[
            r"^[0-9]+$",
            r"^[0-9]+$",
            r"^[+-]?([0-9]*[,])?[0-9]+[ \t]+[+-]?([0-9]*[,])?[0-9]+$",
        ],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "reflectance.mon",
        radix_point: '.',
        field_delimiter: Some(" +"),
        split: (14, 4),
        line_matchers: &[r"^//Монохроматор: результаты регистрации$"],
        encoding: Encoding::Windows1251,
    },
    FiletypeDef {
        key: "reflectance.csv",
        radix_point: ',',
        field_delimiter: Some("; "),
        split: (1, 0),
        line_matchers: &[
            r"^nm; ((%R)|A)$",
            r"[+-]?([0-9]*[,])?[0-9]+; [+-]?([0-9]*[,])?[0-9]+",
            r"[+-]?([0-9]*[,])?[0-9]+; [+-]?([0-9]*[,])?[0-9]+",
        ],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "raman.txt",
        radix_point: '.',
        field_delimiter: Some("\t"),
        split: (0, 0),
        line_matchers: &[r"^[+-]?([0-9]*[.])?[0-9]+[\t][+-]?([0-9]*[.])?[0-9]+$"],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "ftir.dpt",
        radix_point: '.',
        field_delimiter: Some(","),
        split: (0, 0),
        line_matchers: &[r"^[+-]?([0-9]*[.])?[0-9]+[,][+-]?([0-9]*[.])?[0-9]+$"],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "xrd.txt",
        radix_point: '.',
        field_delimiter: Some(" +"),
        split: (0, 0),
        line_matchers: &[
            r"^[+-]?([0-9]*[.])?[0-9]+ +[0-9]+$",
            r"^[+-]?([0-9]*[.])?[0-9]+ +[0-9]+$",
            r"^[+-]?([0-9]*[.])?[0-9]+ +[0-9]+$",
        ],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "xrf.txt",
        radix_point: '.',
        field_delimiter: Some("[\t][ ]+"),
        split: (0, 0),
        line_matchers: &[
            r"^[+-]?([0-9]*[.])?[0-9]+\t +[+-]?([0-9]*[.])?[0-9]+$",
            r"^[+-]?([0-9]*[.])?[0-9]+\t +[+-]?([0-9]*[.])?[0-9]+$",
            r"^[+-]?([0-9]*[.])?[0-9]+\t +[+-]?([0-9]*[.])?[0-9]+$",
        ],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "xrf.dat",
        radix_point: '.',
        field_delimiter: None,
        split: (1, 0),
        line_matchers: &[
            r"^[+-]?([0-9]*[.])?[0-9]+ [+-]?([0-9]*[.])?[0-9]+$",
            r"^[0-9]+$",
            r"^[0-9]+$",
        ],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "xrd.xy",
        radix_point: '.',
        field_delimiter: Some(" +"),
        split: (0, 0),
        line_matchers: &[
            r"^[+-]?([0-9]*[.])?[0-9]+ [+-]?([0-9]*[.])?[0-9]+$",
            r"^[+-]?([0-9]*[.])?[0-9]+ [+-]?([0-9]*[.])?[0-9]+$",
            r"^[+-]?([0-9]*[.])?[0-9]+ [+-]?([0-9]*[.])?[0-9]+$",
        ],
        encoding: Encoding::Utf8,
    },
    FiletypeDef {
        key: "thz.txt",
        radix_point: ',',
        field_delimiter: Some("\t"),
        split: (0, 0),
        line_matchers: &[
            r"^[+-]?([0-9]*[,])?[0-9]+\t[+-]?([0-9]*[,])?[0-9]+$",
            r"^[+-]?([0-9]*[,])?[0-9]+\t[+-]?([0-9]*[,])?[0-9]+$",
            r"^[+-]?([0-9]*[,])?[0-9]+\t[+-]?([0-9]*[,])?[0-9]+$",
        ],
        encoding: Encoding::Utf8,
    },
];

/// XRF counts are spread over the 0-40 keV window of the Tracer detector.
const XRF_ENERGY_RANGE_KEV: (f64, f64) = (0.0, 40.0);

#[derive(Debug, Clone)]
pub struct FiletypeRegistry {
    entries: Vec<Filetype>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ProcessorError::ConfigError {
        message: format!("invalid filetype pattern '{}': {}", pattern, e),
    })
}

impl FiletypeRegistry {
    /// Instrument formats accepted by the processor.
    pub fn builtin() -> Result<Self> {
        let entries = DEFINITIONS
            .iter()
            .map(|def| {
                let layout = match def.field_delimiter {
                    Some(delimiter) => Layout::Delimited {
                        delimiter: compile(delimiter)?,
                        radix_point: def.radix_point,
                    },
                    None => Layout::Counts {
                        x_range: XRF_ENERGY_RANGE_KEV,
                    },
                };
                let line_matchers = def
                    .line_matchers
                    .iter()
                    .map(|pattern| compile(pattern))
                    .collect::<Result<Vec<_>>>()?;

                Ok(Filetype {
                    key: def.key,
                    layout,
                    data_start: def.split.0,
                    data_trailer: def.split.1,
                    encoding: def.encoding,
                    line_matchers,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&Filetype> {
        self.entries.iter().find(|f| f.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|f| f.key)
    }

    /// Resolves the filetype of a raw file.
    ///
    /// `{category}.{extension}` is tried first; when that key is unknown or its
    /// matchers reject the content, every registered type is sniffed in order.
    pub fn detect(&self, category: &str, filename: &str, content: &[u8]) -> Result<&Filetype> {
        let key = filetype_key(category, filename);

        if let Some(filetype) = self.get(&key) {
            if filetype.matches(&filetype.decode(content)) {
                return Ok(filetype);
            }
            tracing::debug!("Content does not look like '{}', sniffing", key);
        }

        self.sniff(content)
            .ok_or(ProcessorError::UnsupportedFiletypeError { filetype: key })
    }

    pub fn sniff(&self, content: &[u8]) -> Option<&Filetype> {
        let utf8 = decode(content, Encoding::Utf8);
        let mut cp1251: Option<Cow<'_, str>> = None;

        self.entries.iter().find(|filetype| match filetype.encoding {
            Encoding::Utf8 => filetype.matches(&utf8),
            Encoding::Windows1251 => {
                let text = cp1251.get_or_insert_with(|| decode(content, Encoding::Windows1251));
                filetype.matches(text)
            }
        })
    }
}

pub fn extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

pub fn filetype_key(category: &str, filename: &str) -> String {
    format!("{}.{}", category.trim().to_lowercase(), extension(filename))
}

pub fn decode(content: &[u8], encoding: Encoding) -> Cow<'_, str> {
    match encoding {
        Encoding::Utf8 => {
            let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
            String::from_utf8_lossy(content)
        }
        Encoding::Windows1251 => encoding_rs::WINDOWS_1251
            .decode_without_bom_handling(content)
            .0,
    }
}
