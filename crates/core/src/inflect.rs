//! English singularization for resource names (`posts` -> `post`).

/// Words whose singular and plural forms are identical.
const UNCOUNTABLE: &[&str] = &[
    "bison", "deer", "equipment", "fish", "information", "moose", "money", "news", "rice",
    "series", "sheep", "species", "swine",
];

/// Irregular plural -> singular pairs.
const IRREGULAR: &[(&str, &str)] = &[
    ("analyses", "analysis"),
    ("children", "child"),
    ("crises", "crisis"),
    ("criteria", "criterion"),
    ("diagnoses", "diagnosis"),
    ("feet", "foot"),
    ("geese", "goose"),
    ("indices", "index"),
    ("lives", "life"),
    ("knives", "knife"),
    ("matrices", "matrix"),
    ("men", "man"),
    ("mice", "mouse"),
    ("movies", "movie"),
    ("oxen", "ox"),
    ("people", "person"),
    ("phenomena", "phenomenon"),
    ("shoes", "shoe"),
    ("teeth", "tooth"),
    ("theses", "thesis"),
    ("toes", "toe"),
    ("vertices", "vertex"),
    ("wives", "wife"),
    ("women", "woman"),
];

/// Suffix rules, first match wins: (plural suffix, singular replacement).
const SUFFIX_RULES: &[(&str, &str)] = &[
    ("sses", "ss"),
    ("shes", "sh"),
    ("ches", "ch"),
    ("xes", "x"),
    ("zzes", "zz"),
    ("uses", "us"),
    ("oes", "o"),
    ("lves", "lf"),
    ("eaves", "eaf"),
    ("oaves", "oaf"),
];

/// Singular form of `word`, preserving an all-uppercase or capitalized input.
pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    let singular = singular_lower(&lower);
    restore_case(word, &singular)
}

fn singular_lower(word: &str) -> String {
    if word.is_empty() || UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }

    if let Some((plural, singular)) = IRREGULAR
        .iter()
        .find(|(plural, _)| word == *plural || compound_ends_with(word, plural))
    {
        return format!("{}{}", &word[..word.len() - plural.len()], singular);
    }

    if let Some(stem) = word.strip_suffix("ies") {
        if stem.chars().last().is_some_and(|c| !"aeiouy".contains(c)) || stem.ends_with("qu") {
            return format!("{stem}y");
        }
    }

    for (suffix, replacement) in SUFFIX_RULES {
        if let Some(stem) = word.strip_suffix(suffix) {
            if !stem.is_empty() {
                return format!("{stem}{replacement}");
            }
        }
    }

    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }

    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => word.to_string(),
    }
}

/// `housewives` ends with the irregular `wives`; `omen` must not match `men`.
fn compound_ends_with(word: &str, plural: &str) -> bool {
    plural.len() >= 5 && word.len() > plural.len() && word.ends_with(plural)
}

fn restore_case(original: &str, singular: &str) -> String {
    let has_letters = original.chars().any(char::is_alphabetic);
    if has_letters && original.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase) {
        return singular.to_uppercase();
    }
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = singular.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    singular.to_string()
}
