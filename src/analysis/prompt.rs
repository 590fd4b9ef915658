//! Prompt builders for the narrative analyst.

use crate::types::{DefectClass, InspectionSummary};

/// Structured shop-floor report: summary, confidence interpretation,
/// likely causes, actions, follow-up checks.
pub fn defect_analysis(summary: &InspectionSummary, class_label: &str) -> String {
    let status = status_word(summary.predicted_class);
    let confidence = percent(summary.confidence);

    let (cause_instruction, action_instruction) = match summary.predicted_class {
        DefectClass::Normal => (
            "Give two reasons the part meets specification.",
            "Approve for shipment, move to the next process step, keep the inspection record.",
        ),
        DefectClass::Defective => (
            "Give at least three concrete possible causes (e.g. mould temperature, injection \
             pressure, cooling rate, material impurities).",
            "Quarantine immediately and decide rework or scrap, check process variables \
             (temperature, pressure, time), consider 100% inspection of the same lot.",
        ),
    };

    format!(
        r#"You are a manufacturing quality-control expert and casting process engineer.
Write a professional shop-floor report based on the automated inspection result below.

AUTOMATED INSPECTION RESULT
- Verdict: {class_label}
- Model confidence: {confidence}
- P(normal): {normal}
- P(defective): {defective}

Use exactly this structure, each section headed ### N. Title:

### 1. Verdict summary
- One sentence stating the part's condition (normal or defective).
- Rate the confidence level (>= 95%: high, 80-95%: medium, < 80%: low).

### 2. Confidence interpretation
Interpret the confidence of {confidence} using these bands:
- >= 95%: "The model is very certain. No further verification needed."
- 80-95%: "The model is reliable. A visual re-check is recommended."
- 60-80%: "The model is uncertain. An expert visual inspection is required."
- < 60%: "The model cannot be trusted. A detailed expert inspection is mandatory."
Explain in one or two sentences.

### 3. Likely causes
{status} verdict: {cause_instruction}

### 4. Recommended actions
{status} part: {action_instruction}

### 5. Further checks
- Areas an expert should re-check visually
- Measurements to take (wall thickness, hardness, ...)
- Precautions for the next production run

Keep it concise, use technical terms with a short explanation, and state concrete values and criteria."#,
        normal = percent(summary.class_probabilities.normal),
        defective = percent(summary.class_probabilities.defective),
    )
}

/// Immediate actions for operators and QC staff.
pub fn recommendation(summary: &InspectionSummary) -> String {
    let status = status_word(summary.predicted_class);
    let confidence = percent(summary.confidence);

    format!(
        r#"A cast part was judged '{status}' (model confidence: {confidence}).

Write the immediate actions for shop-floor operators and quality-control staff, using this structure:

### Operator actions (at most 3)
- First action
- Second action
- Third action

### QC checks (2)
- First check
- Second check

Make the actions concrete and actionable for a {status} verdict. Be brief and clear."#
    )
}

fn status_word(class: DefectClass) -> &'static str {
    match class {
        DefectClass::Normal => "normal",
        DefectClass::Defective => "defective",
    }
}

fn percent(p: f64) -> String {
    format!("{:.2}%", p * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassProbabilities;

    fn summary(class: DefectClass, confidence: f64) -> InspectionSummary {
        let other = 1.0 - confidence;
        InspectionSummary {
            predicted_class: class,
            confidence,
            class_probabilities: match class {
                DefectClass::Normal => ClassProbabilities { normal: confidence, defective: other },
                DefectClass::Defective => ClassProbabilities { normal: other, defective: confidence },
            },
        }
    }

    #[test]
    fn test_analysis_prompt_carries_verdict_and_bands() {
        let prompt = defect_analysis(&summary(DefectClass::Defective, 0.9734), "Defective (NG)");
        assert!(prompt.contains("Verdict: Defective (NG)"));
        assert!(prompt.contains("Model confidence: 97.34%"));
        assert!(prompt.contains("60-80%"));
        assert!(prompt.contains("mould temperature"));
        assert!(prompt.contains("### 5. Further checks"));
        assert!(prompt.ends_with("state concrete values and criteria."));
    }

    #[test]
    fn test_normal_prompt_asks_for_reasons() {
        let prompt = defect_analysis(&summary(DefectClass::Normal, 0.99), "Normal (OK)");
        assert!(prompt.contains("meets specification"));
        assert!(!prompt.contains("Quarantine"));
    }

    #[test]
    fn test_recommendation_prompt() {
        let prompt = recommendation(&summary(DefectClass::Normal, 0.8));
        assert!(prompt.contains("judged 'normal' (model confidence: 80.00%)"));
        assert!(prompt.contains("### QC checks"));
    }
}
