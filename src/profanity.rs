/// Fixed profanity token list applied to article titles. Matching is
/// case-insensitive on word boundaries so "Scunthorpe" stays clean.
const PROFANITY: &[&str] = &[
    "arsehole",
    "asshole",
    "bastard",
    "bitch",
    "bollocks",
    "bullshit",
    "cocksucker",
    "cunt",
    "dickhead",
    "dipshit",
    "douchebag",
    "fuck",
    "fucked",
    "fucker",
    "fucking",
    "goddamn",
    "horseshit",
    "motherfucker",
    "pissed",
    "prick",
    "shit",
    "shitty",
    "slut",
    "twat",
    "wanker",
    "whore",
];

pub fn contains_profanity(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| PROFANITY.binary_search(&word).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_sorted_for_binary_search() {
        let mut sorted = PROFANITY.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, PROFANITY);
    }

    #[test]
    fn flags_profane_titles() {
        assert!(contains_profanity("This is fucking terrible"));
        assert!(contains_profanity("SHIT happens, apparently"));
    }

    #[test]
    fn ignores_clean_titles_and_substrings() {
        assert!(!contains_profanity("Hello world"));
        // Substring hits inside larger words do not count.
        assert!(!contains_profanity("Scunthorpe council meets Tuesday"));
        assert!(!contains_profanity("A classic assessment"));
    }
}
