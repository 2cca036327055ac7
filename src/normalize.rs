use crate::db::SpellRecord;
use crate::parser::spell::RawSpell;

const AFFIRMATIVE: &[&str] = &["si", "sì", "yes", "true"];

/// Map a parsed page onto the stored column types.
pub fn normalize(raw: RawSpell) -> SpellRecord {
    let components = present(raw.components);
    let material = material_of(components.as_deref());

    SpellRecord {
        url: raw.url,
        name: raw.name,
        level: raw.level,
        school: present(raw.school),
        ritual: is_affirmative(raw.ritual.as_deref()),
        concentration: is_affirmative(raw.concentration.as_deref()),
        casting_time: present(raw.casting_time),
        range: present(raw.range),
        components,
        material,
        duration: present(raw.duration),
        classes: present(raw.classes),
        description: present(raw.description),
        higher_level: present(raw.higher_level),
        source: raw.source,
    }
}

pub fn is_affirmative(text: Option<&str>) -> bool {
    text.map(|t| t.trim().to_lowercase())
        .is_some_and(|t| AFFIRMATIVE.contains(&t.as_str()))
}

/// Text between the first `(` and the last `)` of the components line.
pub fn material_of(components: Option<&str>) -> Option<String> {
    let c = components?;
    let open = c.find('(')?;
    let close = c.rfind(')')?;
    if close <= open {
        return None;
    }
    present(Some(c[open + 1..close].to_string()))
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirmative_tokens() {
        for yes in ["Sì", "si", "YES", "true", "  Si  "] {
            assert!(is_affirmative(Some(yes)), "{yes:?}");
        }
        for no in ["No", "", "maybe", "sìsì"] {
            assert!(!is_affirmative(Some(no)), "{no:?}");
        }
        assert!(!is_affirmative(None));
    }

    #[test]
    fn material_between_outer_parens() {
        assert_eq!(
            material_of(Some("V, S, M (a pinch of sulfur)")).as_deref(),
            Some("a pinch of sulfur")
        );
        assert_eq!(
            material_of(Some("V, M (una gemma (da 50 mo) consumata)")).as_deref(),
            Some("una gemma (da 50 mo) consumata")
        );
        assert_eq!(material_of(Some("V, S")), None);
        assert_eq!(material_of(Some("V, S, M (")), None);
        assert_eq!(material_of(Some("V ) S (")), None);
        assert_eq!(material_of(Some("M ()")), None);
        assert_eq!(material_of(None), None);
    }

    #[test]
    fn record_from_raw() {
        let raw = RawSpell {
            url: "https://dungeonedraghi.it/compendio/incantesimi/luce/".into(),
            name: "Luce".into(),
            level: 0,
            school: Some("Invocazione".into()),
            ritual: None,
            components: Some("V, M (una lucciola)".into()),
            concentration: Some("Sì".into()),
            classes: Some(String::new()),
            source: "dungeonedraghi.it".into(),
            ..Default::default()
        };
        let r = normalize(raw);
        assert!(!r.ritual);
        assert!(r.concentration);
        assert_eq!(r.material.as_deref(), Some("una lucciola"));
        assert_eq!(r.classes, None);
        assert_eq!(r.duration, None);
        assert_eq!(r.school.as_deref(), Some("Invocazione"));
    }
}
