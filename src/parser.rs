// 🏗️ Parser Framework
// One parser per declared submission format. Structural decode only -
// field semantics belong to the FieldValidator.

use crate::error::ParseError;
use crate::record::{
    EnrollmentRecord, EnrollmentSubmission, OfficeInfo, OwnerInfo, SubmissionFormat,
    SubmissionHeader,
};
use quick_xml::events::Event;
use quick_xml::Reader;

// ============================================================================
// CORE TRAIT
// ============================================================================

/// SubmissionParser - the only interface the engine needs
pub trait SubmissionParser: Send + Sync {
    /// Decode raw bytes into header + ordered records
    fn parse(&self, bytes: &[u8]) -> Result<EnrollmentSubmission, ParseError>;

    /// Format this parser handles
    fn format(&self) -> SubmissionFormat;

    /// Parser version
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Get the parser for a declared format
pub fn get_parser(format: SubmissionFormat) -> Box<dyn SubmissionParser> {
    match format {
        SubmissionFormat::Flat => Box::new(FlatParser::new()),
        SubmissionFormat::Xml => Box::new(XmlParser::new()),
    }
}

/// Convenience: parse bytes with the parser for `format`
pub fn parse_submission(
    bytes: &[u8],
    format: SubmissionFormat,
) -> Result<EnrollmentSubmission, ParseError> {
    get_parser(format).parse(bytes)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "n" => Some(false),
        "true" | "1" | "yes" | "y" => Some(true),
        _ => None,
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// FLAT PARSER
// ============================================================================

/// Pipe-delimited layout:
///
/// ```text
/// HDR|<record_count>|<transmitter_id>|<processing_year>
/// ENR|<40 positional fields>
/// ```
pub struct FlatParser;

/// Columns after the `ENR` tag
pub const FLAT_RECORD_FIELDS: usize = 40;
const FLAT_HEADER_FIELDS: usize = 3;

impl FlatParser {
    pub fn new() -> Self {
        FlatParser
    }

    fn header_from_row(row: &csv::StringRecord) -> SubmissionHeader {
        SubmissionHeader {
            record_count: row.get(1).and_then(non_empty),
            transmitter_id: row.get(2).and_then(non_empty),
            processing_year: row.get(3).and_then(non_empty),
        }
    }

    fn record_from_row(
        row: &csv::StringRecord,
        index: usize,
        line: usize,
    ) -> Result<EnrollmentRecord, ParseError> {
        // Skip the tag column; positions below are relative to the payload
        let fields: Vec<String> = row.iter().skip(1).map(|f| f.trim().to_string()).collect();
        let field = |i: usize| fields[i].clone();

        let client_flag = parse_flag(&fields[39]).ok_or_else(|| ParseError::Malformed {
            line,
            message: format!("ClientOfYoursLastYear '{}' is not a boolean", fields[39]),
        })?;

        let owner_at = |start: usize| OwnerInfo {
            first_name: field(start),
            last_name: field(start + 1),
            phone_number: field(start + 2),
            email: field(start + 3),
            address1: field(start + 4),
            address2: field(start + 5),
            city: field(start + 6),
            state: field(start + 7),
            zip: field(start + 8),
            ssn: field(start + 9),
            date_of_birth: field(start + 10),
        };

        Ok(EnrollmentRecord {
            index,
            source_line: line,
            master_efin: field(0),
            efin: field(1),
            transmitter_id: field(2),
            processing_year: field(3),
            transaction_date: field(4),
            office: OfficeInfo {
                office_name: field(5),
                primary_contact_first: field(6),
                primary_contact_last: field(7),
                phone_number: field(8),
                fax_number: field(9),
                email: field(10),
                address1: field(11),
                address2: field(12),
                city: field(13),
                state: field(14),
                zip: field(15),
            },
            owner: owner_at(16),
            efin_owner: owner_at(27),
            prior_year: crate::record::PriorYearInfo {
                bank: field(38),
                client_of_yours_last_year: client_flag,
            },
        })
    }
}

impl Default for FlatParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionParser for FlatParser {
    fn parse(&self, bytes: &[u8]) -> Result<EnrollmentSubmission, ParseError> {
        let text = std::str::from_utf8(bytes)?;

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(text.as_bytes());

        let mut header: Option<SubmissionHeader> = None;
        let mut records = Vec::new();

        for result in rdr.records() {
            let row = result.map_err(|e| ParseError::Malformed {
                line: e.position().map(|p| p.line() as usize).unwrap_or(0),
                message: e.to_string(),
            })?;
            let line = row.position().map(|p| p.line() as usize).unwrap_or(0);

            if row.iter().all(|f| f.trim().is_empty()) {
                continue;
            }

            let tag = row.get(0).map(|t| t.trim()).unwrap_or_default();
            match tag {
                "HDR" => {
                    if header.is_some() {
                        return Err(ParseError::Malformed {
                            line,
                            message: "duplicate HDR line".to_string(),
                        });
                    }
                    if !records.is_empty() {
                        return Err(ParseError::Malformed {
                            line,
                            message: "HDR must precede all ENR lines".to_string(),
                        });
                    }
                    if row.len() != FLAT_HEADER_FIELDS + 1 {
                        return Err(ParseError::Malformed {
                            line,
                            message: format!(
                                "HDR has {} fields, expected {}",
                                row.len() - 1,
                                FLAT_HEADER_FIELDS
                            ),
                        });
                    }
                    header = Some(Self::header_from_row(&row));
                }
                "ENR" => {
                    if header.is_none() {
                        return Err(ParseError::MissingHeader);
                    }
                    if row.len() != FLAT_RECORD_FIELDS + 1 {
                        return Err(ParseError::Malformed {
                            line,
                            message: format!(
                                "ENR has {} fields, expected {}",
                                row.len() - 1,
                                FLAT_RECORD_FIELDS
                            ),
                        });
                    }
                    records.push(Self::record_from_row(&row, records.len(), line)?);
                }
                other => {
                    return Err(ParseError::Malformed {
                        line,
                        message: format!("unknown line tag '{}'", other),
                    });
                }
            }
        }

        let header = header.ok_or(ParseError::MissingHeader)?;

        Ok(EnrollmentSubmission {
            format: SubmissionFormat::Flat,
            header,
            records,
        })
    }

    fn format(&self) -> SubmissionFormat {
        SubmissionFormat::Flat
    }
}

// ============================================================================
// XML PARSER
// ============================================================================

const ROOT: &str = "EnrollmentCollection";

/// `<EnrollmentCollection>` with an optional `<Header>` and repeated
/// `<Enrollment>` elements. Unknown elements are skipped.
pub struct XmlParser;

impl XmlParser {
    pub fn new() -> Self {
        XmlParser
    }

    fn assign_header(header: &mut SubmissionHeader, leaf: &str, value: String) {
        let value = non_empty(&value);
        match leaf {
            "RecordCount" => header.record_count = value,
            "TransmitterId" | "TransmitterID" => header.transmitter_id = value,
            "ProcessingYear" => header.processing_year = value,
            _ => {}
        }
    }

    fn assign_record(
        record: &mut EnrollmentRecord,
        group: Option<&str>,
        leaf: &str,
        value: String,
        position: u64,
    ) -> Result<(), ParseError> {
        match group {
            None => match leaf {
                "MasterEfin" => record.master_efin = value,
                "EFIN" => record.efin = value,
                "TransmitterId" | "TransmitterID" => record.transmitter_id = value,
                "ProcessingYear" => record.processing_year = value,
                "TransactionDate" => record.transaction_date = value,
                _ => {}
            },
            Some("OfficeInfo") => {
                let office = &mut record.office;
                match leaf {
                    "OfficeName" => office.office_name = value,
                    "PrimaryContactFirst" => office.primary_contact_first = value,
                    "PrimaryContactLast" => office.primary_contact_last = value,
                    "PhoneNumber" => office.phone_number = value,
                    "FaxNumber" => office.fax_number = value,
                    "Email" => office.email = value,
                    "Address1" => office.address1 = value,
                    "Address2" => office.address2 = value,
                    "City" => office.city = value,
                    "State" => office.state = value,
                    "Zip" => office.zip = value,
                    _ => {}
                }
            }
            Some("OwnerInformation") => Self::assign_owner(&mut record.owner, leaf, value),
            Some("EFINOwnerInfo") => Self::assign_owner(&mut record.efin_owner, leaf, value),
            Some("PriorYearInfo") => match leaf {
                "Bank" => record.prior_year.bank = value,
                "ClientOfYoursLastYear" => {
                    record.prior_year.client_of_yours_last_year =
                        parse_flag(&value).ok_or_else(|| ParseError::Xml {
                            position,
                            message: format!(
                                "ClientOfYoursLastYear '{}' is not a boolean",
                                value
                            ),
                        })?;
                }
                _ => {}
            },
            Some(_) => {}
        }
        Ok(())
    }

    fn assign_owner(owner: &mut OwnerInfo, leaf: &str, value: String) {
        match leaf {
            "FirstName" => owner.first_name = value,
            "LastName" => owner.last_name = value,
            "PhoneNumber" => owner.phone_number = value,
            "Email" => owner.email = value,
            "Address1" => owner.address1 = value,
            "Address2" => owner.address2 = value,
            "City" => owner.city = value,
            "State" => owner.state = value,
            "Zip" => owner.zip = value,
            "SSN" => owner.ssn = value,
            "DateOfBirth" => owner.date_of_birth = value,
            _ => {}
        }
    }

    fn resolve_entity(name: &str, position: u64) -> Result<char, ParseError> {
        match name {
            "amp" => Ok('&'),
            "lt" => Ok('<'),
            "gt" => Ok('>'),
            "quot" => Ok('"'),
            "apos" => Ok('\''),
            other => Err(ParseError::Xml {
                position,
                message: format!("unknown entity &{};", other),
            }),
        }
    }
}

impl Default for XmlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionParser for XmlParser {
    fn parse(&self, bytes: &[u8]) -> Result<EnrollmentSubmission, ParseError> {
        let text = std::str::from_utf8(bytes)?;

        let mut reader = Reader::from_str(text);
        let mut buf = Vec::new();

        // Open element names, root first
        let mut path: Vec<String> = Vec::new();
        let mut text_buf = String::new();
        let mut seen_root = false;

        let mut header = SubmissionHeader::default();
        let mut current: Option<EnrollmentRecord> = None;
        let mut records = Vec::new();

        loop {
            buf.clear();
            let position = reader.buffer_position() as u64;
            let event = reader.read_event_into(&mut buf).map_err(|e| ParseError::Xml {
                position: reader.error_position() as u64,
                message: e.to_string(),
            })?;

            match event {
                Event::Start(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if path.is_empty() {
                        if name != ROOT || seen_root {
                            return Err(ParseError::MissingRoot(ROOT));
                        }
                        seen_root = true;
                    } else if path.len() == 1 && name == "Enrollment" {
                        current = Some(EnrollmentRecord {
                            index: records.len(),
                            source_line: position as usize,
                            ..Default::default()
                        });
                    }
                    path.push(name);
                    text_buf.clear();
                }
                Event::Empty(ref e) => {
                    if path.is_empty() {
                        let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                        if name != ROOT {
                            return Err(ParseError::MissingRoot(ROOT));
                        }
                        seen_root = true;
                    } else if path.len() == 1 && e.name().as_ref() == b"Enrollment" {
                        records.push(EnrollmentRecord {
                            index: records.len(),
                            source_line: position as usize,
                            ..Default::default()
                        });
                    }
                }
                Event::Text(ref e) => {
                    text_buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
                Event::CData(ref e) => {
                    text_buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
                Event::GeneralRef(ref e) => {
                    let resolved = e.resolve_char_ref().map_err(|err| ParseError::Xml {
                        position,
                        message: err.to_string(),
                    })?;
                    match resolved {
                        Some(ch) => text_buf.push(ch),
                        None => {
                            let name = String::from_utf8_lossy(&e[..]).to_string();
                            text_buf.push(Self::resolve_entity(&name, position)?);
                        }
                    }
                }
                Event::End(_) => {
                    let Some(name) = path.pop() else {
                        return Err(ParseError::Xml {
                            position,
                            message: "closing tag without opening tag".to_string(),
                        });
                    };
                    let value = text_buf.trim().to_string();
                    text_buf.clear();

                    // path now holds the ancestors of `name`
                    match path.len() {
                        // </Enrollment>
                        1 if name == "Enrollment" => {
                            if let Some(record) = current.take() {
                                records.push(record);
                            }
                        }
                        // <Header><Leaf>
                        2 if path[1] == "Header" => {
                            Self::assign_header(&mut header, &name, value);
                        }
                        // <Enrollment><Leaf>
                        2 if path[1] == "Enrollment" => {
                            if let Some(record) = current.as_mut() {
                                Self::assign_record(record, None, &name, value, position)?;
                            }
                        }
                        // <Enrollment><Group><Leaf>
                        3 if path[1] == "Enrollment" => {
                            if let Some(record) = current.as_mut() {
                                let group = path[2].clone();
                                Self::assign_record(record, Some(&group), &name, value, position)?;
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = path.pop() {
            return Err(ParseError::Unclosed(open));
        }
        if !seen_root {
            return Err(ParseError::MissingRoot(ROOT));
        }

        Ok(EnrollmentSubmission {
            format: SubmissionFormat::Xml,
            header,
            records,
        })
    }

    fn format(&self) -> SubmissionFormat {
        SubmissionFormat::Xml
    }
}

// ============================================================================
// TESTS
// ============================================================================
