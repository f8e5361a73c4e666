//! Instruction text for multimodal patient-record extraction.
//!
//! The prompt is the only contract the model sees, so it lives in exactly one
//! versioned constant. Bump [`PROMPT_VERSION`] whenever the schema block
//! changes: it is logged with every request, which makes it possible to tell
//! which schema a stored answer was produced against.
//!
//! The schema block must stay key-for-key identical to
//! [`crate::schema::PatientRecord`]; a unit test walks the serialised default
//! record and fails on any key the prompt does not mention.

/// Version tag of [`EXTRACTION_PROMPT`].
pub const PROMPT_VERSION: &str = "1";

/// Fixed instruction text sent alongside every uploaded document.
pub const EXTRACTION_PROMPT: &str = r#"You are a medical data extraction specialist. Your task is to analyze medical reports (PDFs, images, or documents) and extract structured patient data.

When analyzing medical reports, extract information and return ONLY valid JSON (no markdown, no explanations) that matches this exact schema:

{
  "patient_id": "NAHED-YYYY-NNN",
  "clinical_data": {
    "diagnosis": "string - primary diagnosis",
    "stage": "string - if applicable (e.g., IIB, Stage 3)",
    "biomarkers": {
      "HER2": "string - positive/negative/unknown",
      "ER": "string - positive/negative/unknown",
      "PR": "string - positive/negative/unknown"
    },
    "urgency_score": "number - 0-1 scale",
    "recommended_action": "string - clinical recommendation"
  },
  "financial_profile": {
    "annual_income": "number or string",
    "income_currency": "string - e.g., EGP, USD",
    "country": "string - country name",
    "insurance_status": "string - insured/uninsured/partial",
    "fibo_class": "string - Low-Income Household/Middle-Income/etc"
  },
  "pharma_integration": {
    "drug_needed": {
      "generic_name": "string",
      "brand_options": ["string"],
      "treatment_duration_months": "number",
      "estimated_market_cost": "string"
    },
    "eligibility_flags": {
      "income_verified": "boolean",
      "clinical_need_verified": "boolean"
    },
    "patient_access_program": {
      "program_name": "string",
      "subsidy_percentage": "number",
      "application_status": "string"
    }
  },
  "holistic_support": {
    "nutrition_plan": {
      "regimen_type": "string",
      "focus": "string",
      "recommended_foods": ["string"],
      "avoid": ["string"],
      "hydration_goal": "string"
    },
    "psychological_support": {
      "assessment": "string",
      "recommended_intervention": "string",
      "resource_assigned": "string",
      "support_session_available": "boolean"
    }
  },
  "logistics": {
    "nearest_center": "string",
    "distance_km": "number",
    "next_appointment": "string - ISO 8601 format",
    "transport_support_needed": "boolean",
    "ngo_contacts": [
      {
        "name": "string",
        "contact": "string",
        "support_type": "string"
      }
    ]
  },
  "diagnostic_summary": {
    "urgency": "string - High/Medium/Low",
    "clinical_steps": ["string"]
  },
  "fibo_financial_mapping": {
    "estimated_total_cost": "number",
    "funding_sources": {
      "patient_coverage": "number",
      "ngo_support": "number",
      "grant_pending": "number"
    }
  }
}

If any information is not available in the report, use reasonable defaults or null values. Return ONLY the JSON object, nothing else."#;

/// The instruction text for an extraction request.
pub fn extraction_prompt() -> &'static str {
    EXTRACTION_PROMPT
}
