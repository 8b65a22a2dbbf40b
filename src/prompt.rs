//! Prompt templating and response extraction.
//!
//! Instructions are rendered into Alpaca-style prompts. Template selection is
//! a pure function of whether the optional input field is empty; nothing else
//! branches here.

/// Template used when an instruction carries additional input context.
pub const PROMPT_WITH_INPUT: &str = "Below is an instruction that describes a task, \
paired with an input that provides further context. \
Write a response that appropriately completes the request.\n\n\
### Instruction:\n{instruction}\n\n### Input:\n{input}\n\n### Response:\n";

/// Template used for bare instructions.
pub const PROMPT_WITHOUT_INPUT: &str = "Below is an instruction that describes a task. \
Write a response that appropriately completes the request.\n\n\
### Instruction:\n{instruction}\n\n### Response:\n";

/// Marker preceding the model's answer in the decoded output.
pub const RESPONSE_MARKER: &str = "### Response:";

/// Fallback marker emitted by seq2seq decoders that start from a pad token.
pub const PAD_MARKER: &str = "<pad> ";

/// A single task description supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The task description.
    pub instruction: String,
    /// Optional further context, empty in typical CLI usage.
    pub input: String,
}

impl Instruction {
    /// Build an instruction with an empty input field.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            input: String::new(),
        }
    }

    /// Render this instruction into its prompt.
    pub fn render(&self) -> String {
        if self.input.is_empty() {
            PROMPT_WITHOUT_INPUT.replace("{instruction}", &self.instruction)
        } else {
            PROMPT_WITH_INPUT
                .replace("{instruction}", &self.instruction)
                .replace("{input}", &self.input)
        }
    }
}

/// Render one prompt per instruction, preserving order.
pub fn build_prompts(instructions: &[Instruction]) -> Vec<String> {
    instructions.iter().map(Instruction::render).collect()
}

/// Extract the response segment from decoded model output.
///
/// Returns the text after `"### Response:"` when present, otherwise after
/// `"<pad> "`, otherwise the full string unchanged. The marker ordering is a
/// fixed tie-break. Extracted segments are trimmed; the no-marker case is not.
pub fn extract_response(decoded: &str) -> &str {
    if let Some(idx) = decoded.find(RESPONSE_MARKER) {
        decoded[idx + RESPONSE_MARKER.len()..].trim()
    } else if let Some(idx) = decoded.find(PAD_MARKER) {
        decoded[idx + PAD_MARKER.len()..].trim()
    } else {
        decoded
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_input_uses_the_instruction_only_template() {
        let instruction = Instruction::new("Tell me about alpacas.");
        let prompt = instruction.render();
        assert_eq!(
            prompt,
            "Below is an instruction that describes a task. \
             Write a response that appropriately completes the request.\n\n\
             ### Instruction:\nTell me about alpacas.\n\n### Response:\n"
        );
    }

    #[test]
    fn non_empty_input_uses_the_instruction_and_input_template() {
        let instruction = Instruction {
            instruction: "Summarize the text.".to_string(),
            input: "Alpacas are domesticated camelids.".to_string(),
        };
        let prompt = instruction.render();
        assert!(prompt.contains("### Input:\nAlpacas are domesticated camelids.\n\n"));
        assert!(prompt.starts_with("Below is an instruction that describes a task, paired"));
        assert!(prompt.ends_with("### Response:\n"));
    }

    #[test]
    fn prompts_preserve_instruction_order() {
        let instructions = vec![
            Instruction::new("first"),
            Instruction::new("second"),
            Instruction::new("third"),
        ];
        let prompts = build_prompts(&instructions);
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("\nfirst\n"));
        assert!(prompts[1].contains("\nsecond\n"));
        assert!(prompts[2].contains("\nthird\n"));
    }

    #[test]
    fn response_marker_wins_and_is_trimmed() {
        assert_eq!(extract_response("### Response:\nHello"), "Hello");
        assert_eq!(
            extract_response("prompt text ### Response:\n  Hello world \n"),
            "Hello world"
        );
    }

    #[test]
    fn response_marker_takes_precedence_over_pad_marker() {
        let decoded = "<pad> ignored ### Response:\nanswer";
        assert_eq!(extract_response(decoded), "answer");
    }

    #[test]
    fn pad_marker_is_the_fallback() {
        assert_eq!(extract_response("<pad> Alpacas are great.\n"), "Alpacas are great.");
    }

    #[test]
    fn no_marker_returns_input_unchanged() {
        let decoded = "  raw decoder output  ";
        assert_eq!(extract_response(decoded), decoded);
    }
}
