//! Luhn 校验
//!
//! 订单号与提现单号在提交前都需要通过 Luhn 校验。

/// 校验十进制数字串是否满足 Luhn 校验和
///
/// 空串或包含非数字字符时返回 false。
pub fn is_valid(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (i, ch) in digits.bytes().rev().enumerate() {
        if !ch.is_ascii_digit() {
            return false;
        }
        let mut d = u32::from(ch - b'0');
        // 从右往左，校验位之后每隔一位翻倍
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }

    sum % 10 == 0
}

/// 校验数值形式的号码
pub fn is_valid_number(number: i64) -> bool {
    number >= 0 && is_valid(&number.to_string())
}

/// 为给定前缀计算 Luhn 校验位
pub fn check_digit(prefix: &str) -> Option<u8> {
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    (0..=9u8).find(|d| is_valid(&format!("{prefix}{d}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_valid_numbers() {
        assert!(is_valid("79927398713"));
        assert!(is_valid("4561261212345467"));
        assert!(is_valid("0"));
        assert!(is_valid_number(79927398713));
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(!is_valid("79927398710"));
        assert!(!is_valid("4561261212345464"));
        assert!(!is_valid(""));
        assert!(!is_valid("7992-7398713"));
        assert!(!is_valid_number(-79927398713));
    }

    #[test]
    fn test_check_digit() {
        assert_eq!(check_digit("7992739871"), Some(3));
        assert_eq!(check_digit("12a"), None);
    }
}
