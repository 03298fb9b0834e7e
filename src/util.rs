pub fn mean(data: &[f64]) -> Option<f64> {
    let sum = data.iter().sum::<f64>();
    let count = data.len();

    match count {
        positive if positive > 0 => Some(sum / count as f64),
        _ => None,
    }
}

pub fn std_dev(data: &[f64]) -> Option<f64> {
    match (mean(data), data.len()) {
        (Some(data_mean), count) if count > 0 => {
            let variance = data
                .iter()
                .map(|value| {
                    let diff = data_mean - *value;

                    diff * diff
                })
                .sum::<f64>()
                / count as f64;

            Some(variance.sqrt())
        }
        _ => None,
    }
}

/// Whitespace-delimited word count, the definition used by the words-mode
/// completion check and by result word counts.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Round to one decimal place (accuracy is stored at this precision).
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
