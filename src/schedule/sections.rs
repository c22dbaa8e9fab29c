/// Number of sections a class schedules under. Enrollment at or below the
/// capacity threshold keeps the class whole.
pub fn division_count(enrollment: i64, capacity: i64) -> i64 {
    if capacity <= 0 || enrollment <= capacity {
        return 1;
    }
    (enrollment + capacity - 1) / capacity
}

/// Spreadsheet-style label for a division index: 0 -> "A", 25 -> "Z",
/// 26 -> "AA". Stable for a given index regardless of how many divisions
/// the class ends up with.
pub fn division_label(index: i64) -> String {
    let mut n = index + 1;
    let mut out = String::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.insert(0, (b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    out
}

/// Labels a class schedules under: `[""]` when one session covers the whole
/// class, `["A", "B", ..]` when enrollment forces a split.
pub fn division_labels(enrollment: i64, capacity: i64) -> Vec<String> {
    let count = division_count(enrollment, capacity);
    if count <= 1 {
        return vec![String::new()];
    }
    (0..count).map(division_label).collect()
}
