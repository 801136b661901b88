/// Keyword stem and the topic label it counts toward.
pub struct TopicStem {
    pub stem: &'static str,
    pub label: &'static str,
}

pub const TOPIC_STEMS: [TopicStem; 5] = [
    TopicStem { stem: "comp", label: "COMP Advice" },
    TopicStem { stem: "hous", label: "Housing" },
    TopicStem { stem: "career", label: "Career" },
    TopicStem { stem: "food", label: "Dining" },
    TopicStem { stem: "studi", label: "Study Abroad" },
];

/// Labels whose stem occurs anywhere in `query`, case-insensitively, in table order.
pub fn detect_topics(query: &str) -> Vec<&'static str> {
    let lower = query.to_lowercase();
    TOPIC_STEMS.iter()
        .filter(|t| lower.contains(t.stem))
        .map(|t| t.label)
        .collect()
}
