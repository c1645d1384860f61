//! Catalog of the governed target fields and their mapping rules.
//!
//! Each variant is one local-field → target-field translation rule-set.
//! Adding a type means adding a variant; every accessor below is an
//! exhaustive match, so the compiler walks you to each table that needs a
//! row.

/// Whether a target vocabulary accepts any code or only a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSetPolicy {
    /// Any non-empty code; vocabulary correctness is checked elsewhere.
    Open,
    /// Only the listed codes, case-sensitive.
    Closed(&'static [&'static str]),
}

/// Encounter class codes from HL7 v3 ActCode.
const PATIENT_CLASS_CODES: &[&str] = &[
    "AMB", "EMER", "FLD", "HH", "IMP", "ACUTE", "NONAC", "OBSENC", "PRENC", "SS", "VR",
];

const REPORT_STATUS_CODES: &[&str] = &[
    "registered",
    "partial",
    "preliminary",
    "final",
    "amended",
    "corrected",
    "appended",
    "cancelled",
    "entered-in-error",
    "unknown",
];

/// Observation interpretation codes we accept from OBX-8 mappings.
const ABNORMAL_FLAG_CODES: &[&str] = &[
    "N", "A", "AA", "L", "LL", "H", "HH", "U", "D", "B", "W", "R", "S", "I",
];

/// Renamed type identifiers that may still be present in stored tasks,
/// tables, or admin bookmarks. Renaming a type adds a row here instead of
/// orphaning existing data.
const LEGACY_NAME_ALIASES: &[(&str, MappingType)] = &[
    ("loinc-code", MappingType::ObservationCodeLoinc),
    ("encounter-class", MappingType::PatientClass),
    ("result-status", MappingType::ReportStatus),
];

/// Task classification codes written by earlier releases.
const LEGACY_TASK_CODES: &[(&str, MappingType)] = &[
    ("loinc-mapping", MappingType::ObservationCodeLoinc),
    ("patient-class-mapping", MappingType::PatientClass),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingType {
    /// OBX-3 local observation identifiers → LOINC.
    ObservationCodeLoinc,
    /// PV1-2 patient class → encounter class (v3 ActCode).
    PatientClass,
    /// OBR-25 result status → DiagnosticReport.status.
    ReportStatus,
    /// OBX-8 abnormal flags → observation interpretation.
    AbnormalFlag,
}

impl MappingType {
    pub fn all() -> &'static [MappingType] {
        &[
            MappingType::ObservationCodeLoinc,
            MappingType::PatientClass,
            MappingType::ReportStatus,
            MappingType::AbnormalFlag,
        ]
    }

    /// Current canonical name, also used in admin filters.
    pub fn name(&self) -> &'static str {
        match self {
            MappingType::ObservationCodeLoinc => "observation-code-loinc",
            MappingType::PatientClass => "patient-class",
            MappingType::ReportStatus => "report-status",
            MappingType::AbnormalFlag => "abnormal-flag",
        }
    }

    /// Suffix appended to the sender slug to form the crosswalk table id.
    /// Stays stable across renames; `LEGACY_NAME_ALIASES` covers the names.
    pub fn id_suffix(&self) -> &'static str {
        self.name()
    }

    pub fn target_system(&self) -> &'static str {
        match self {
            MappingType::ObservationCodeLoinc => "http://loinc.org",
            MappingType::PatientClass => "http://terminology.hl7.org/CodeSystem/v3-ActCode",
            MappingType::ReportStatus => "http://hl7.org/fhir/diagnostic-report-status",
            MappingType::AbnormalFlag => {
                "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation"
            }
        }
    }

    /// HL7v2 field the local code is read from.
    pub fn source_field(&self) -> &'static str {
        match self {
            MappingType::ObservationCodeLoinc => "OBX-3",
            MappingType::PatientClass => "PV1-2",
            MappingType::ReportStatus => "OBR-25",
            MappingType::AbnormalFlag => "OBX-8",
        }
    }

    /// FHIR element the resolved coding lands on.
    pub fn target_field(&self) -> &'static str {
        match self {
            MappingType::ObservationCodeLoinc => "Observation.code",
            MappingType::PatientClass => "Encounter.class",
            MappingType::ReportStatus => "DiagnosticReport.status",
            MappingType::AbnormalFlag => "Observation.interpretation",
        }
    }

    /// Classification code stamped on tasks raised for this type.
    pub fn task_code(&self) -> &'static str {
        match self {
            MappingType::ObservationCodeLoinc => "unmapped-observation-code",
            MappingType::PatientClass => "unmapped-patient-class",
            MappingType::ReportStatus => "unmapped-report-status",
            MappingType::AbnormalFlag => "unmapped-abnormal-flag",
        }
    }

    pub fn display_title(&self) -> &'static str {
        match self {
            MappingType::ObservationCodeLoinc => "Observation code (LOINC)",
            MappingType::PatientClass => "Patient class",
            MappingType::ReportStatus => "Report status",
            MappingType::AbnormalFlag => "Abnormal flag",
        }
    }

    pub fn policy(&self) -> ValueSetPolicy {
        match self {
            MappingType::ObservationCodeLoinc => ValueSetPolicy::Open,
            MappingType::PatientClass => ValueSetPolicy::Closed(PATIENT_CLASS_CODES),
            MappingType::ReportStatus => ValueSetPolicy::Closed(REPORT_STATUS_CODES),
            MappingType::AbnormalFlag => ValueSetPolicy::Closed(ABNORMAL_FLAG_CODES),
        }
    }

    /// Look up a type by name, accepting deprecated identifiers.
    pub fn from_name(name: &str) -> Option<MappingType> {
        if let Some(t) = Self::all().iter().find(|t| t.name() == name) {
            return Some(*t);
        }
        LEGACY_NAME_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, t)| *t)
    }

    /// Reverse-map a stored task classification code, tolerating codes
    /// written before the current naming.
    pub fn from_task_code(code: &str) -> Option<MappingType> {
        if let Some(t) = Self::all().iter().find(|t| t.task_code() == code) {
            return Some(*t);
        }
        LEGACY_TASK_CODES
            .iter()
            .find(|(legacy, _)| *legacy == code)
            .map(|(_, t)| *t)
    }

    pub fn from_target_system(uri: &str) -> Option<MappingType> {
        Self::all().iter().find(|t| t.target_system() == uri).copied()
    }
}

impl std::fmt::Display for MappingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of target-system URIs this engine owns. Stored tables whose
/// target is not in this set belong to someone else and are never listed.
pub fn known_target_systems() -> Vec<&'static str> {
    MappingType::all().iter().map(|t| t.target_system()).collect()
}
