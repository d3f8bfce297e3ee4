//! Localized user-facing texts: persona definitions, greetings and the fixed
//! set of apologies the gateway is allowed to return.

use serde::{Deserialize, Serialize};

use crate::agents::{AgentKey, AgentProfile};
use crate::redact::redact;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Fr,
    En,
}

impl Locale {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "fr" | "fr-fr" | "fr_fr" | "french" => Some(Self::Fr),
            "en" | "en-us" | "en-gb" | "en_us" | "english" => Some(Self::En),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fr => "fr",
            Self::En => "en",
        }
    }
}

/// Static persona texts for one agent key in one locale.
pub(crate) struct PersonaText {
    pub name: &'static str,
    pub role: &'static str,
    pub access_rules: &'static [&'static str],
    pub tasks: &'static [&'static str],
    pub style: &'static [&'static str],
}

pub(crate) fn persona_text(key: AgentKey, locale: Locale) -> PersonaText {
    match (key, locale) {
        (AgentKey::Admin, Locale::Fr) => PersonaText {
            name: "Assistant Direction",
            role: "administration de l'établissement",
            access_rules: &[
                "Données agrégées de l'établissement uniquement",
                "Aucune donnée d'un autre établissement",
                "Pas de données bancaires ni de mots de passe",
            ],
            tasks: &[
                "Suivre l'assiduité et les résultats",
                "Repérer les impayés",
                "Préparer les décisions de pilotage",
            ],
            style: &["Factuel et synthétique", "Orienté décision"],
        },
        (AgentKey::Admin, Locale::En) => PersonaText {
            name: "Leadership Assistant",
            role: "school administration",
            access_rules: &[
                "Aggregated school data only",
                "No data from any other school",
                "No banking details or credentials",
            ],
            tasks: &[
                "Monitor attendance and results",
                "Spot overdue payments",
                "Prepare management decisions",
            ],
            style: &["Factual and concise", "Decision oriented"],
        },
        (AgentKey::Accountant, Locale::Fr) => PersonaText {
            name: "Assistant Comptable",
            role: "comptabilité",
            access_rules: &[
                "Paiements, factures et barèmes de l'établissement",
                "Aucune note ni donnée pédagogique",
            ],
            tasks: &["Suivre les encaissements", "Relancer les impayés"],
            style: &["Chiffré et précis", "Présentation en tableau"],
        },
        (AgentKey::Accountant, Locale::En) => PersonaText {
            name: "Accounting Assistant",
            role: "accounting",
            access_rules: &[
                "School payments, invoices and fee schedules",
                "No grades or teaching data",
            ],
            tasks: &["Track collections", "Follow up on overdue payments"],
            style: &["Numeric and precise", "Tabular presentation"],
        },
        (AgentKey::Teacher, Locale::Fr) => PersonaText {
            name: "Assistant Pédagogique",
            role: "enseignement",
            access_rules: &[
                "Classes, notes et absences de vos élèves",
                "Aucune donnée financière ni salariale",
            ],
            tasks: &[
                "Identifier les élèves en difficulté",
                "Préparer un plan d'action pédagogique",
            ],
            style: &["Bienveillant et concret", "Étapes actionnables"],
        },
        (AgentKey::Teacher, Locale::En) => PersonaText {
            name: "Teaching Assistant",
            role: "teaching",
            access_rules: &[
                "Classes, grades and absences of your students",
                "No financial or salary data",
            ],
            tasks: &[
                "Identify struggling students",
                "Prepare a teaching action plan",
            ],
            style: &["Supportive and concrete", "Actionable steps"],
        },
        (AgentKey::Student, Locale::Fr) => PersonaText {
            name: "Assistant Élève",
            role: "vie scolaire de l'élève",
            access_rules: &[
                "Vos notes, absences et emploi du temps",
                "Aucune donnée concernant d'autres élèves",
            ],
            tasks: &["Comprendre vos résultats", "Organiser vos révisions"],
            style: &["Simple et encourageant"],
        },
        (AgentKey::Student, Locale::En) => PersonaText {
            name: "Student Assistant",
            role: "student life",
            access_rules: &[
                "Your grades, absences and timetable",
                "No data about other students",
            ],
            tasks: &["Understand your results", "Plan your revisions"],
            style: &["Simple and encouraging"],
        },
        (AgentKey::Parent, Locale::Fr) => PersonaText {
            name: "Assistant Famille",
            role: "suivi parental",
            access_rules: &[
                "Notes, absences et paiements de vos enfants",
                "Aucune donnée concernant d'autres familles",
            ],
            tasks: &["Suivre la scolarité de vos enfants", "Vérifier les échéances"],
            style: &["Clair et rassurant"],
        },
        (AgentKey::Parent, Locale::En) => PersonaText {
            name: "Family Assistant",
            role: "parent follow-up",
            access_rules: &[
                "Grades, absences and payments of your children",
                "No data about other families",
            ],
            tasks: &["Follow your children's schooling", "Check upcoming dues"],
            style: &["Clear and reassuring"],
        },
    }
}

/// Welcome message shown when the user sends an empty message.
pub fn greeting(profile: &AgentProfile, locale: Locale) -> String {
    let (intro, rules, tasks, style, prompt) = match locale {
        Locale::Fr => (
            format!("Bonjour, je suis {}, votre assistant {}.", profile.name, profile.role),
            "Ce à quoi j'ai accès :",
            "Ce que je peux faire pour vous :",
            "Mon style :",
            "Posez-moi votre question.",
        ),
        Locale::En => (
            format!("Hello, I am {}, your {} assistant.", profile.name, profile.role),
            "What I can access:",
            "What I can do for you:",
            "My style:",
            "Ask me your question.",
        ),
    };

    let mut out = intro;
    for (title, items) in [
        (rules, &profile.access_rules),
        (tasks, &profile.tasks),
        (style, &profile.style),
    ] {
        out.push_str("\n\n");
        out.push_str(title);
        for item in items {
            out.push_str("\n- ");
            out.push_str(item);
        }
    }
    out.push_str("\n\n");
    out.push_str(prompt);
    out
}

/// Reply used when the assistant runs without access to live data.
pub fn isolated_reply(profile: &AgentProfile, content: &str, locale: Locale) -> String {
    let excerpt: String = redact(content.trim()).chars().take(120).collect();
    match locale {
        Locale::Fr => format!(
            "{} ({}) : j'ai bien reçu « {} ». Je suis configuré mais isolé des données de l'établissement pour le moment.",
            profile.name, profile.role, excerpt
        ),
        Locale::En => format!(
            "{} ({}): I received \"{}\". I am configured but currently isolated from live school data.",
            profile.name, profile.role, excerpt
        ),
    }
}

pub fn no_agent(locale: Locale) -> String {
    match locale {
        Locale::Fr => {
            "Désolé, aucun assistant n'est disponible pour votre profil.".to_string()
        }
        Locale::En => "Sorry, no assistant is available for your profile.".to_string(),
    }
}

/// Shared apology for every "no access", "no data" and "unexpected document"
/// outcome, so the user cannot tell them apart.
pub fn no_authorized_data(profile: &AgentProfile, locale: Locale) -> String {
    match locale {
        Locale::Fr => format!(
            "{} ({}) : désolé, je n'ai pas accès à des données autorisées pour répondre à cette demande.",
            profile.name, profile.role
        ),
        Locale::En => format!(
            "{} ({}): sorry, I have no access to authorized data to answer this request.",
            profile.name, profile.role
        ),
    }
}

pub fn rate_limited(profile: &AgentProfile, locale: Locale) -> String {
    match locale {
        Locale::Fr => format!(
            "{} ({}) : trop de demandes en peu de temps. Merci de réessayer dans une minute.",
            profile.name, profile.role
        ),
        Locale::En => format!(
            "{} ({}): too many requests in a short time. Please try again in a minute.",
            profile.name, profile.role
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redact::{REDACTION_MARKER, contains_sensitive};

    #[test]
    fn locale_parse_accepts_common_spellings() {
        assert_eq!(Locale::parse(" FR "), Some(Locale::Fr));
        assert_eq!(Locale::parse("en-US"), Some(Locale::En));
        assert_eq!(Locale::parse("de"), None);
    }

    #[test]
    fn apologies_name_the_persona_first() {
        let profile = AgentProfile::builtin(AgentKey::Teacher, Locale::Fr);
        let text = no_authorized_data(&profile, Locale::Fr);
        assert!(text.starts_with("Assistant Pédagogique (enseignement)"));
        let text = rate_limited(&profile, Locale::Fr);
        assert!(text.starts_with("Assistant Pédagogique"));
    }

    #[test]
    fn greeting_lists_rules_tasks_and_style() {
        let profile = AgentProfile::builtin(AgentKey::Student, Locale::En);
        let text = greeting(&profile, Locale::En);
        assert!(text.contains("Student Assistant"));
        for item in profile
            .access_rules
            .iter()
            .chain(&profile.tasks)
            .chain(&profile.style)
        {
            assert!(text.contains(item.as_str()), "missing {item}");
        }
    }

    #[test]
    fn isolated_reply_truncates_long_content() {
        let profile = AgentProfile::builtin(AgentKey::Parent, Locale::En);
        let long = "x".repeat(500);
        let text = isolated_reply(&profile, &long, Locale::En);
        assert!(text.contains(&"x".repeat(120)));
        assert!(!text.contains(&"x".repeat(121)));
        assert!(text.contains("isolated from live school data"));
    }

    #[test]
    fn isolated_reply_redacts_contact_details() {
        let profile = AgentProfile::builtin(AgentKey::Parent, Locale::Fr);
        let text = isolated_reply(
            &profile,
            "écrire à awa.diallo@example.org ou 06 12 34 56 78",
            Locale::Fr,
        );
        assert!(!contains_sensitive(&text), "{text}");
        assert_eq!(text.matches(REDACTION_MARKER).count(), 2);
        assert!(!text.contains("awa.diallo"));
    }
}
