use rand::RngExt;

const CHROME_VERSIONS: [&str; 8] = [
    "109.0.5221.33",
    "110.0.5253.19",
    "112.0.5589.41",
    "114.0.5735.110",
    "116.0.5845.96",
    "118.0.5993.70",
    "120.0.6099.109",
    "122.0.6261.94",
];

const FIREFOX_VERSIONS: [&str; 6] = ["109.0", "112.0", "115.0", "118.0", "121.0", "123.0"];

const OS_STRINGS: [&str; 6] = [
    "Windows NT 10.0; Win64; x64",
    "Windows NT 6.1",
    "Macintosh; Intel Mac OS X 10_15",
    "Macintosh; Intel Mac OS X 12_0",
    "X11; Ubuntu; Linux x86_64",
    "X11; Linux x86_64",
];

fn gen_chrome_ua() -> String {
    let mut rng = rand::rng();
    let version = CHROME_VERSIONS[rng.random_range(0..CHROME_VERSIONS.len())];
    let os = OS_STRINGS[rng.random_range(0..OS_STRINGS.len())];
    format!(
        "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
        os, version
    )
}

fn gen_firefox_ua() -> String {
    let mut rng = rand::rng();
    let version = FIREFOX_VERSIONS[rng.random_range(0..FIREFOX_VERSIONS.len())];
    let os = OS_STRINGS[rng.random_range(0..OS_STRINGS.len())];
    format!(
        "Mozilla/5.0 ({}; rv:{}) Gecko/20100101 Firefox/{}",
        os, version, version
    )
}

pub fn gen_random_ua() -> String {
    let mut rng = rand::rng();
    if rng.random_range(0..2) == 0 {
        gen_chrome_ua()
    } else {
        gen_firefox_ua()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_random_ua() {
        let ua = gen_random_ua();
        assert!(ua.starts_with("Mozilla/5.0"));
    }
}
