//! Цены в масштабированном целочисленном виде.
//!
//! Цена хранится как `round(f * 10^8)`. Точности `f64` для диапазонов
//! валютных курсов хватает, поэтому округление под точность конкретного
//! инструмента не делаем.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Степень десятки масштаба
pub const SCALE_EXP: u32 = 8;

/// Множитель масштаба
pub const SCALE: i64 = 100_000_000;

/// Верхняя граница значений, помещающихся в 6-байтовое поле
pub const MAX_48: i64 = 1 << 48;

/// float -> scaled int
pub fn float_to_scaled(price: f64) -> i64 {
    (price * SCALE as f64).round() as i64
}

/// scaled int -> float
pub fn scaled_to_float(price: i64) -> f64 {
    price as f64 / SCALE as f64
}

/// scaled int -> Decimal (без потерь)
pub fn scaled_to_decimal(price: i64) -> Decimal {
    Decimal::new(price, SCALE_EXP)
}

/// Decimal -> scaled int, лишние знаки отбрасываются (как `int()`)
pub fn decimal_to_scaled(price: Decimal) -> i64 {
    // переполнение на патологических значениях не проверяем
    let mut scaled = (price * Decimal::from(SCALE)).trunc();
    scaled.rescale(0);
    scaled.mantissa() as i64
}

/// float -> Decimal через масштабированное представление
pub fn float_to_decimal(price: f64) -> Decimal {
    scaled_to_decimal(float_to_scaled(price))
}

/// Decimal -> float
pub fn decimal_to_float(price: Decimal) -> f64 {
    price.to_f64().unwrap_or(f64::NAN)
}

/// Обратная цена (например USD/CAD -> CAD/USD)
pub fn reciprocal(price: i64) -> i64 {
    float_to_scaled(1.0 / scaled_to_float(price))
}

/// Делит 48-битное значение на (high:u16, low:u32).
///
/// Предусловие: `0 <= value < 2^48`, в релизе не проверяется.
pub fn split48(value: i64) -> (u16, u32) {
    debug_assert!((0..MAX_48).contains(&value), "value out of 48-bit range: {value}");
    ((value >> 32) as u16, (value & 0xFFFF_FFFF) as u32)
}

/// Собирает значение обратно из (high, low)
pub fn join48(high: u16, low: u32) -> i64 {
    ((high as i64) << 32) + low as i64
}
