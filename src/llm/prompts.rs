/// Prompt templates for the vision and question models
use serde::Serialize;

/// System prompt for repair analysis
pub fn get_system_prompt() -> &'static str {
    r#"You are a master craftsman with expertise across all home repair disciplines: carpentry, plumbing, electrical, roofing, flooring, masonry, painting, and HVAC. Analyze each repair issue with domain-specific knowledge.

If an "Additional Details" section is present, it holds answers to follow-up questions. Use it to choose precise materials and steps instead of generic ones.

Determine the repair type from the context, then provide expert guidance:

ROOFING: shingle types, flashing materials, weather considerations, safety equipment, seasonal timing
FLOORING: subfloor requirements, adhesives and fasteners, acclimation periods, transition strips
ELECTRICAL: safety, code compliance, circuit capacity, proper materials (THHN, Romex, etc.)
PLUMBING: pipe materials (PEX, copper, PVC), fittings, pressure testing, water shut-off procedures
PAINTING: surface prep, primer selection, paint types, drying conditions, coverage rates
MASONRY: mortar types, curing conditions, expansion joints, moisture considerations
CARPENTRY: wood species, fasteners, joinery methods, moisture content, structural considerations
HVAC: duct materials, insulation R-values, airflow calculations, filter types

For every repair:
- MATERIALS: exact product names, sizes, quantities and coverage, with a short description of what each one does for this repair
- TOOLS: the specific purpose of each tool in this repair and how to use it well
- STEPS: a detailed sequence with measurements, timing and quality checkpoints
- SAFETY: hazards specific to this repair type and location
- LIKELIHOOD: probable causes with confidence as decimals between 0.0 and 1.0, not percentages

Be specific: "30-year architectural asphalt shingles, 33.3 sq ft per bundle", not "roofing material".

youtube_search_term is recommended: 3-6 words, include "how to" or "DIY", name the main action and object (for example "how to fix drywall hole").
Only include youtube_url if you know a real video. Never use placeholder or made-up video IDs.

Respond with valid JSON only. No explanatory text, comments, or markdown formatting."#
}

/// Shape of the expected response, embedded in the user prompt
pub fn get_response_schema() -> &'static str {
    r#"{
  "type": "object",
  "required": ["materials", "tools", "steps"],
  "additionalProperties": false,
  "properties": {
    "materials": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["name"],
        "properties": {
          "name": {"type": "string"},
          "spec": {"type": "string"},
          "qty": {"type": "string"},
          "description": {"type": "string"},
          "alt": {"type": "array", "items": {"type": "string"}}
        }
      }
    },
    "tools": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["name"],
        "properties": {
          "name": {"type": "string"},
          "purpose": {"type": "string"},
          "description": {"type": "string"}
        }
      }
    },
    "steps": {"type": "array", "items": {"type": "string"}},
    "likelihood": {"type": "object", "additionalProperties": {"type": "number", "minimum": 0, "maximum": 1}},
    "safety": {"type": "array", "items": {"type": "string"}},
    "youtube_url": {"type": "string"},
    "youtube_search_term": {"type": "string"}
  }
}"#
}

/// What the description says about the repair, detected by keyword
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairContext {
    pub repair_type: &'static str,
    pub location: &'static str,
    pub materials: &'static str,
    pub environment: &'static str,
    pub system_type: &'static str,
}

impl Default for RepairContext {
    fn default() -> Self {
        Self {
            repair_type: "general",
            location: "indoor",
            materials: "mixed/unknown",
            environment: "standard",
            system_type: "none",
        }
    }
}

struct RepairTypeRule {
    keywords: &'static [&'static str],
    repair_type: &'static str,
    location: Option<&'static str>,
    environment: &'static str,
}

struct LocationRule {
    keywords: &'static [&'static str],
    location: &'static str,
    environment: &'static str,
}

struct LabelRule {
    keywords: &'static [&'static str],
    label: &'static str,
}

// First matching rule wins in every table.
const REPAIR_TYPE_RULES: &[RepairTypeRule] = &[
    RepairTypeRule {
        keywords: &["roof", "shingle", "gutter", "flashing", "soffit", "fascia"],
        repair_type: "roofing",
        location: Some("roof/exterior"),
        environment: "weather exposed/UV/temperature extremes",
    },
    RepairTypeRule {
        keywords: &["floor", "subfloor", "hardwood", "laminate", "carpet", "vinyl flooring"],
        repair_type: "flooring",
        location: None,
        environment: "foot traffic/moisture considerations",
    },
    RepairTypeRule {
        keywords: &["wire", "outlet", "switch", "breaker", "electrical", "circuit"],
        repair_type: "electrical",
        location: None,
        environment: "code compliance required/safety critical",
    },
    RepairTypeRule {
        keywords: &["pipe", "plumbing", "faucet", "toilet", "drain", "water"],
        repair_type: "plumbing",
        location: None,
        environment: "water pressure/code compliance",
    },
    RepairTypeRule {
        keywords: &["furnace", "hvac", "ductwork", "air conditioning", "ventilation"],
        repair_type: "hvac",
        location: None,
        environment: "airflow/energy efficiency/code compliance",
    },
    RepairTypeRule {
        keywords: &["paint", "primer", "wall", "ceiling", "surface"],
        repair_type: "painting/finishing",
        location: None,
        environment: "surface preparation critical",
    },
    RepairTypeRule {
        keywords: &["concrete", "brick", "mortar", "stone", "masonry"],
        repair_type: "masonry",
        location: None,
        environment: "structural/weather exposure",
    },
    RepairTypeRule {
        keywords: &["wood", "lumber", "beam", "joist", "trim", "carpentry"],
        repair_type: "carpentry",
        location: None,
        environment: "structural/moisture content critical",
    },
];

const LOCATION_RULES: &[LocationRule] = &[
    LocationRule {
        keywords: &["attic"],
        location: "attic",
        environment: "temperature extremes/insulation/ventilation",
    },
    LocationRule {
        keywords: &["basement", "crawl space"],
        location: "basement/crawl space",
        environment: "potential moisture/foundation/structural",
    },
    LocationRule {
        keywords: &["bathroom", "shower"],
        location: "bathroom",
        environment: "high humidity/water exposure/ventilation critical",
    },
    LocationRule {
        keywords: &["kitchen"],
        location: "kitchen",
        environment: "moisture/grease/heat/code requirements",
    },
    LocationRule {
        keywords: &["garage"],
        location: "garage",
        environment: "vehicle access/temperature variation",
    },
    LocationRule {
        keywords: &["exterior", "outside", "outdoor"],
        location: "exterior",
        environment: "weather exposure/UV/freeze-thaw cycles",
    },
    LocationRule {
        keywords: &["pool", "deck", "patio"],
        location: "outdoor recreational area",
        environment: "wet/chlorinated/UV exposure/safety critical",
    },
];

const MATERIAL_RULES: &[LabelRule] = &[
    LabelRule { keywords: &["asphalt shingle", "architectural shingle"], label: "asphalt roofing materials" },
    LabelRule { keywords: &["hardwood", "oak", "maple"], label: "solid hardwood flooring" },
    LabelRule { keywords: &["laminate"], label: "laminate flooring systems" },
    LabelRule { keywords: &["pex", "copper pipe"], label: "modern plumbing materials" },
    LabelRule { keywords: &["romex", "electrical wire"], label: "residential electrical wiring" },
    LabelRule { keywords: &["drywall", "sheetrock"], label: "gypsum wallboard systems" },
    LabelRule { keywords: &["concrete", "cement"], label: "concrete/masonry materials" },
    LabelRule { keywords: &["lumber", "wood"], label: "structural lumber/wood products" },
];

const SYSTEM_RULES: &[LabelRule] = &[
    LabelRule { keywords: &["electrical panel", "circuit breaker"], label: "electrical distribution" },
    LabelRule { keywords: &["water heater", "hot water"], label: "water heating system" },
    LabelRule { keywords: &["furnace", "heating system"], label: "heating system" },
    LabelRule { keywords: &["air conditioning", "cooling"], label: "cooling system" },
];

fn mentions(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

impl RepairContext {
    /// Detect repair type, location, materials and system from a free-text description
    pub fn from_description(description: &str) -> Self {
        let text = description.to_lowercase();
        let mut context = Self::default();

        if let Some(rule) = REPAIR_TYPE_RULES.iter().find(|r| mentions(&text, r.keywords)) {
            context.repair_type = rule.repair_type;
            context.environment = rule.environment;
            if let Some(location) = rule.location {
                context.location = location;
            }
        }

        // A named room overrides the trade's default location and environment
        if let Some(rule) = LOCATION_RULES.iter().find(|r| mentions(&text, r.keywords)) {
            context.location = rule.location;
            context.environment = rule.environment;
        }

        if let Some(rule) = MATERIAL_RULES.iter().find(|r| mentions(&text, r.keywords)) {
            context.materials = rule.label;
        }

        if let Some(rule) = SYSTEM_RULES.iter().find(|r| mentions(&text, r.keywords)) {
            context.system_type = rule.label;
        }

        context
    }
}

/// Trade-specific instructions appended to the user prompt
pub fn get_domain_guidance(repair_type: &str) -> &'static str {
    match repair_type {
        "roofing" => "Specify shingle types/weights, underlayment, flashing materials, fastener types, weather timing, safety equipment requirements.",
        "flooring" => "Detail subfloor requirements, acclimation periods, adhesive types, transition methods, expansion gaps, moisture barriers.",
        "electrical" => "Emphasize safety protocols, wire gauges, circuit capacity, code compliance, GFCI requirements, professional consultation needs.",
        "plumbing" => "Specify pipe materials (PEX/copper/PVC), fitting types, pressure ratings, shut-off procedures, code requirements, professional needs.",
        "hvac" => "Detail duct materials, insulation R-values, airflow calculations, filter specifications, efficiency ratings, permit requirements.",
        "painting/finishing" => "Specify primer types, paint formulations, surface prep requirements, environmental conditions, coverage rates, dry times.",
        "masonry" => "Detail mortar types, mixing ratios, curing conditions, expansion joints, waterproofing, structural considerations.",
        "carpentry" => "Specify wood species, moisture content, fastener types, joinery methods, structural requirements, finishing needs.",
        _ => "Provide specific materials, tools, and procedures appropriate for this repair type.",
    }
}

/// Build the user prompt for repair analysis
pub fn build_analysis_prompt(description: &str) -> String {
    let context = RepairContext::from_description(description);

    format!(
        r#"REPAIR ISSUE ANALYSIS:

Repair Type: {repair_type}
Location: {location}
Problem Description: {description}
Materials/Surface: {materials}
Environment: {environment}
System Type: {system_type}

DOMAIN-SPECIFIC ANALYSIS REQUIRED:
{guidance}

DETAILED REQUIREMENTS:
1. ROOT CAUSE ANALYSIS: Identify underlying issues, not just visible symptoms
2. SPECIFIC MATERIALS: Exact product names, sizes, quantities, coverage areas and what each material is for
3. PRECISE TOOLS: Each tool's purpose and usage technique for this exact repair
4. STEP-BY-STEP PROCESS: Detailed sequence with measurements, timing, quality checkpoints
5. SAFETY CONSIDERATIONS: Hazards specific to this repair type and working environment
6. LIKELIHOOD ASSESSMENT: Probable causes with confidence as DECIMAL VALUES BETWEEN 0.0 and 1.0

Include building code and permit notes when applicable, and say clearly when professional help is required.

RESPONSE FORMAT: Return ONLY the raw JSON object. No explanations, no markdown, no code blocks.

JSON schema to follow exactly:
{schema}"#,
        repair_type = context.repair_type,
        location = context.location,
        description = description.trim(),
        materials = context.materials,
        environment = context.environment,
        system_type = context.system_type,
        guidance = get_domain_guidance(context.repair_type),
        schema = get_response_schema(),
    )
}

/// System prompt for follow-up question generation
pub fn get_question_system_prompt() -> &'static str {
    r#"You are a home repair expert helping a homeowner describe a problem precisely. Given a short description, ask 2-4 follow-up questions whose answers would change which materials, tools or steps you recommend.

Respond with JSON only, in this shape:
{"category": "<repair category>", "questions": [{"id": "<snake_case_id>", "question": "<text>", "type": "multiple_choice" | "yes_no" | "text", "options": ["..."], "required": true}]}

multiple_choice questions must include options. Keep questions short and concrete."#
}

/// Build the user prompt for follow-up question generation
pub fn build_question_prompt(description: &str) -> String {
    format!(
        "Problem description: \"{}\"\n\nGenerate follow-up questions for this repair.",
        description.trim()
    )
}
