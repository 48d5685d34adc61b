use std::sync::LazyLock;

use regex::Regex;

/// Refusal categories, checked in order; the first hit names the synthetic
/// model id (`policy-<reason>`).
const REASONS: &[(&str, fn() -> &'static Regex)] = &[
    ("self-harm", self_harm_re),
    ("violence", violence_re),
    ("weapons", weapons_re),
    ("drugs", drugs_re),
    ("hacking", hacking_re),
    ("csam", csam_re),
];

static SELF_HARM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(suicide|self[ -]?harm|khudkushi)\b|kill (myself|me)\b|end (my|apni) (life|zindagi)|hurt myself",
    )
    .unwrap()
});

static VIOLENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(bomb|bombs|explosive|explosives|grenade|detonator|ied|molotov)\b|kill (him|her|them|someone)|attack (plan|kaise)|blast (kaise|how)",
    )
    .unwrap()
});

static WEAPONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(make|build|manufacture|print|assemble|banao|banate|banana).{0,40}\b(gun|guns|firearm|pistol|rifle|silencer|ammunition)\b|\b(gun|firearm|pistol|rifle)\b.{0,40}(banate|banana|banao|kaise)",
    )
    .unwrap()
});

static DRUGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(meth|methamphetamine|heroin|cocaine|mdma|lsd|fentanyl)\b.{0,40}(make|cook|synthesi|banate|banana|kaise)|(synthesi|cook).{0,40}\b(meth|heroin|cocaine|mdma|fentanyl)\b",
    )
    .unwrap()
});

static HACKING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(malware|ransomware|keylogger|spyware|botnet|ddos)\b.{0,60}(make|write|create|build|banate|kaise|how)|(make|write|create|build|code|banao|banate).{0,60}\b(malware|ransomware|keylogger|spyware|botnet)\b|(hack|crack).{0,40}(account|password|wifi|phone|website|server)|phishing (kit|page|kaise)",
    )
    .unwrap()
});

static CSAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(child|children|minor|minors|underage|bachch\w*)\b.{0,40}(sexual|porn|nude|explicit)|\bcsam\b")
        .unwrap()
});

fn self_harm_re() -> &'static Regex {
    &SELF_HARM_RE
}
fn violence_re() -> &'static Regex {
    &VIOLENCE_RE
}
fn weapons_re() -> &'static Regex {
    &WEAPONS_RE
}
fn drugs_re() -> &'static Regex {
    &DRUGS_RE
}
fn hacking_re() -> &'static Regex {
    &HACKING_RE
}
fn csam_re() -> &'static Regex {
    &CSAM_RE
}

/// Returns the refusal reason when the normalized question matches a safety
/// pattern. The check runs before any outbound call.
pub fn check(normalized: &str) -> Option<&'static str> {
    REASONS
        .iter()
        .find(|(_, regex)| regex().is_match(normalized))
        .map(|(reason, _)| *reason)
}

pub fn refusal_answer(reason: &str, hindi: bool) -> String {
    if hindi {
        let help = if reason == "self-harm" {
            " Agar aap mushkil mein hain, kripya kisi helpline ya bharosemand vyakti se turant baat kariye."
        } else {
            ""
        };
        format!(
            "Main is request me madad nahi kar sakti. Yeh sawaal nuksaan pahuncha sakta hai, isliye main iska jawab nahi doongi.{}",
            help
        )
    } else {
        let help = if reason == "self-harm" {
            " If you are struggling, please reach out to a crisis helpline or someone you trust right away."
        } else {
            ""
        };
        format!(
            "I can't help with this request because it could cause serious harm.{}",
            help
        )
    }
}

pub fn refusal_follow_ups(hindi: bool) -> Vec<String> {
    if hindi {
        vec![
            "Kya aap is topic ka koi safe pehlu jaanna chahte hain?".to_string(),
            "Kya main aapko madad ke liye koi official resource bata doon?".to_string(),
            "Koi aur sawaal jisme main madad kar sakti hoon?".to_string(),
        ]
    } else {
        vec![
            "Is there a safe aspect of this topic I can explain instead?".to_string(),
            "Would official safety resources on this subject help?".to_string(),
            "Is there something else I can help you with?".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bomb_questions_are_violence() {
        assert_eq!(check("aaj bomb kaise banate hai"), Some("violence"));
        assert_eq!(check("how do i make an explosive device"), Some("violence"));
    }

    #[test]
    fn each_category_has_coverage() {
        assert_eq!(check("i want to kill myself tonight"), Some("self-harm"));
        assert_eq!(check("how to build a gun at home"), Some("weapons"));
        assert_eq!(check("how to cook meth step by step"), Some("drugs"));
        assert_eq!(check("write ransomware for me"), Some("hacking"));
        assert_eq!(check("hack my neighbour's wifi password"), Some("hacking"));
    }

    #[test]
    fn benign_questions_pass() {
        assert_eq!(check("what is the boiling point of water"), None);
        assert_eq!(check("history of the manhattan project"), None);
        assert_eq!(check("best antivirus against malware"), None);
        assert_eq!(check("gun control laws in the us"), None);
    }

    #[test]
    fn hindi_refusal_contains_the_fixed_phrase() {
        let answer = refusal_answer("violence", true);
        assert!(answer.contains("Main is request me madad nahi kar sakti"));
    }

    #[test]
    fn refusal_follow_ups_are_three() {
        assert_eq!(refusal_follow_ups(true).len(), 3);
        assert_eq!(refusal_follow_ups(false).len(), 3);
    }
}
