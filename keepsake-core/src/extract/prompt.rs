//! Extraction prompt construction
//!
//! The instruction prefix is fixed: worked positive and negative examples
//! pin down what "memorable" means, and the trailing schema reminder keeps
//! responses parseable. Only the chunk text varies between calls, so the
//! cache key can stay a function of the chunk alone.

/// Fixed instruction and example prefix for the extraction call.
const INSTRUCTIONS: &str = r#"You are reviewing one day of chat messages between two people.
Identify exchanges that are genuinely memorable: affectionate, heartwarming, vulnerable, playful in a way specific to the two of them, or part of an inside joke.

Rules:
- Read the whole day before deciding. A message without a leading [date, time] header is a continuation of the previous message.
- Do not select an exchange just because it contains emoji. It should make a reader smile or feel something on a second reading, years later.
- Trim purely logistical lines (scheduling, shopping, who picks whom up) out of a selected exchange. Keep a line before or after only when it is needed as context.
- For every kept message record the date (DD.MM.YY), time (HH:MM:SS), sender name as person, and the message text as quote.
- A day can have no memorable exchanges. Then return an empty list.

KEEP - an inside joke taking shape:
[03.02.24, 21:10:05] Mara: you did the thing again
[03.02.24, 21:10:31] Jon: what thing
[03.02.24, 21:10:58] Mara: hummed the bakery song while reading
[03.02.24, 21:11:20] Jon: it is a good song!!
[03.02.24, 21:11:49] Mara: you invented it. about bread.
[03.02.24, 21:12:15] Jon: the bread deserves it
[03.02.24, 21:12:40] Mara: never change

KEEP - quiet support:
[07.02.24, 23:02:11] Jon: still awake?
[07.02.24, 23:03:05] Mara: for you, yes
[07.02.24, 23:04:18] Jon: the interview rattled me more than I said earlier
[07.02.24, 23:05:02] Mara: I know. you went anyway. that is the whole point
[07.02.24, 23:05:50] Jon: how do you always know what to say
[07.02.24, 23:06:22] Mara: years of studying one very specific subject

SKIP - short and shallow:
[04.02.24, 15:14:50] Jon: excited for tonight?
[04.02.24, 15:15:10] Mara: yes!
[04.02.24, 15:15:25] Jon: same

SKIP - pure logistics:
[05.02.24, 14:12:02] Mara: when should I pick you up
[05.02.24, 14:12:35] Jon: 7 works
[05.02.24, 14:13:10] Mara: bring anything?
[05.02.24, 14:13:45] Jon: just yourself

Respond with a single JSON object of the form
{"exchanges": [[{"date": "DD.MM.YY", "time": "HH:MM:SS", "person": "Name", "quote": "text"}, ...], ...]}
where each inner list is one exchange in original order. Use {"exchanges": []} when nothing qualifies. Output JSON only."#;

/// Build the extraction prompt for one chunk of chat text.
pub fn extraction_prompt(chunk_text: &str) -> String {
    format!(
        "{INSTRUCTIONS}\n\nMessages for the day:\n```\n{}\n```",
        chunk_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_chunk() {
        let prompt = extraction_prompt("[15.01.25, 10:00:00] Alice: hi");
        assert!(prompt.contains("[15.01.25, 10:00:00] Alice: hi"));
        assert!(prompt.contains(r#"{"exchanges": []}"#));
    }

    #[test]
    fn test_prompt_is_stable_for_same_chunk() {
        assert_eq!(extraction_prompt("same"), extraction_prompt("same"));
    }
}
